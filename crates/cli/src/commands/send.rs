// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;

use pl_core::Message;

use crate::client::ChatClient;
use crate::error::Result;

use super::open_client;

/// Queue a message. Prints its id; delivery happens on the next `parley sync`.
pub fn run(data_dir: &Path, conversation: &str, body: &str) -> Result<()> {
    let client = open_client(data_dir)?;
    let msg = run_impl(&client, conversation, body)?;
    println!("{}", msg.id);
    Ok(())
}

pub(crate) fn run_impl(client: &ChatClient, conversation: &str, body: &str) -> Result<Message> {
    client.send_message(conversation, body)
}

#[cfg(test)]
#[path = "send_tests.rs"]
mod tests;
