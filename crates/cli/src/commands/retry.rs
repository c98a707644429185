// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;

use pl_core::MessageId;

use crate::client::ChatClient;
use crate::error::Result;

use super::open_client;

pub fn run(data_dir: &Path, id: &str) -> Result<()> {
    let client = open_client(data_dir)?;
    if run_impl(&client, id)? {
        println!("Requeued {id}");
    } else {
        println!("{id} is already queued");
    }
    Ok(())
}

/// Returns whether the message moved back into the queue.
pub(crate) fn run_impl(client: &ChatClient, id: &str) -> Result<bool> {
    client.retry(&MessageId::from(id.trim()))
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
