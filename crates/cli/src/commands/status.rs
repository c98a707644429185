// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;

use pl_core::{Conversation, DeliveryState, Peer};
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::client::ChatClient;
use crate::display::{format_conversation_line, format_peer_line};
use crate::error::Result;

use super::open_client;

/// Offline snapshot of this device's sync bookkeeping.
#[derive(Debug, Serialize)]
pub(crate) struct StatusReport {
    sender_id: String,
    device_id: String,
    remote: Option<String>,
    conversations: Vec<ConversationReport>,
    outstanding: usize,
    failed: usize,
    peers: Vec<Peer>,
}

#[derive(Debug, Serialize)]
struct ConversationReport {
    #[serde(flatten)]
    conversation: Conversation,
    messages: usize,
}

pub fn run(data_dir: &Path, output: OutputFormat) -> Result<()> {
    let client = open_client(data_dir)?;
    let report = run_impl(&client)?;
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            for line in render(&report) {
                println!("{line}");
            }
        }
    }
    Ok(())
}

pub(crate) fn run_impl(client: &ChatClient) -> Result<StatusReport> {
    let store = client.store();
    let identity = &client.config().identity;
    let conversations = store
        .conversations()?
        .into_iter()
        .map(|conversation| {
            let messages = store.count(&conversation.id)?;
            Ok(ConversationReport { conversation, messages })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(StatusReport {
        sender_id: identity.sender_id.clone(),
        device_id: identity.device_id.clone(),
        remote: client.config().remote_url().map(str::to_string),
        conversations,
        outstanding: client.queue().len()?,
        failed: store.count_in_state(DeliveryState::Failed)?,
        peers: store.peers()?,
    })
}

pub(crate) fn render(report: &StatusReport) -> Vec<String> {
    let mut lines = vec![
        format!("Sender: {} (device {})", report.sender_id, report.device_id),
        format!("Remote: {}", report.remote.as_deref().unwrap_or("none")),
        format!("Outbox: {} outstanding, {} failed", report.outstanding, report.failed),
    ];

    lines.push(String::new());
    if report.conversations.is_empty() {
        lines.push("No conversations".to_string());
    } else {
        lines.push("Conversations:".to_string());
        for c in &report.conversations {
            lines.push(format!("  {}", format_conversation_line(&c.conversation, c.messages)));
        }
    }

    if !report.peers.is_empty() {
        lines.push(String::new());
        lines.push("Peers:".to_string());
        for peer in &report.peers {
            lines.push(format!("  {}", format_peer_line(peer)));
        }
    }
    lines
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
