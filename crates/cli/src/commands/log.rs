// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;

use pl_core::Window;

use crate::cli::OutputFormat;
use crate::client::ChatClient;
use crate::display::format_message_line;
use crate::error::Result;
use crate::validate::validate_conversation_id;

use super::open_client;

pub fn run(data_dir: &Path, conversation: &str, limit: usize, output: OutputFormat) -> Result<()> {
    let client = open_client(data_dir)?;
    for line in run_impl(&client, conversation, limit, output)? {
        println!("{line}");
    }
    Ok(())
}

/// Render the last `limit` messages (all when `limit` is 0) in display order.
pub(crate) fn run_impl(
    client: &ChatClient,
    conversation: &str,
    limit: usize,
    output: OutputFormat,
) -> Result<Vec<String>> {
    let conversation = validate_conversation_id(conversation)?;
    let window = match limit {
        0 => Window::all(),
        n => Window::tail(client.store().count(conversation)?, n),
    };
    let messages = client.messages(conversation, window)?;

    match output {
        OutputFormat::Json => Ok(vec![serde_json::to_string_pretty(&messages)?]),
        OutputFormat::Text if messages.is_empty() => {
            Ok(vec![format!("No messages in {conversation}")])
        }
        OutputFormat::Text => Ok(messages.iter().map(format_message_line).collect()),
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
