// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;

use pl_core::{DeliveryState, Message};

use crate::cli::OutputFormat;
use crate::client::ChatClient;
use crate::display::format_outbox_line;
use crate::error::Result;

use super::open_client;

pub fn run(data_dir: &Path, output: OutputFormat) -> Result<()> {
    let client = open_client(data_dir)?;
    for line in run_impl(&client, output)? {
        println!("{line}");
    }
    Ok(())
}

pub(crate) fn run_impl(client: &ChatClient, output: OutputFormat) -> Result<Vec<String>> {
    let entries = client.queue().drain().collect::<Result<Vec<_>>>()?;

    if let OutputFormat::Json = output {
        let messages: Vec<&Message> = entries.iter().map(|e| &e.message).collect();
        return Ok(vec![serde_json::to_string_pretty(&messages)?]);
    }

    let mut lines: Vec<String> = entries.iter().map(format_outbox_line).collect();
    if lines.is_empty() {
        lines.push("Outbox empty".to_string());
    }
    let failed = client.store().count_in_state(DeliveryState::Failed)?;
    if failed > 0 {
        lines.push(format!("{failed} failed (requeue with 'parley retry <id>')"));
    }
    Ok(lines)
}

#[cfg(test)]
#[path = "outbox_tests.rs"]
mod tests;
