// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;

use pl_core::Conversation;

use crate::client::ChatClient;
use crate::error::Result;

use super::open_client;

pub fn run(data_dir: &Path, conversation: &str, participants: &[String]) -> Result<()> {
    let client = open_client(data_dir)?;
    let conversation = run_impl(&client, conversation, participants)?;
    println!(
        "Joined {} ({} participants)",
        conversation.id,
        conversation.participant_ids.len()
    );
    Ok(())
}

pub(crate) fn run_impl(
    client: &ChatClient,
    conversation: &str,
    participants: &[String],
) -> Result<Conversation> {
    client.join(conversation, participants)
}

#[cfg(test)]
#[path = "join_tests.rs"]
mod tests;
