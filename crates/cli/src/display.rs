// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use chrono::DateTime;
use pl_core::{Conversation, DeliveryState, Hlc, Message, OutboxEntry, Peer};

use crate::sync::{ConnectionState, SyncStatus};

/// Render an HLC as a UTC wall-clock time.
pub fn format_time(hlc: &Hlc) -> String {
    i64::try_from(hlc.wall_ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| hlc.to_string())
}

/// Marker for messages still in flight. Acknowledged messages get none.
fn state_tag(state: DeliveryState) -> String {
    match state {
        DeliveryState::Acknowledged => String::new(),
        other => format!("  [{other}]"),
    }
}

/// Format a message for `parley log`.
///
/// Output format:
/// ```text
/// #12  2024-01-10 10:30:00  alice: hello
///  -   2024-01-10 10:31:00  alice: still offline  [pending]
/// ```
pub fn format_message_line(msg: &Message) -> String {
    let seq = match msg.seq {
        Some(seq) => format!("#{seq}"),
        None => " -".to_string(),
    };
    format!(
        "{seq:<4} {}  {}: {}{}",
        format_time(&msg.created_at),
        msg.sender_id,
        msg.body,
        state_tag(msg.delivery_state)
    )
}

/// Format an outbox entry: position, state, id, conversation and body.
pub fn format_outbox_line(entry: &OutboxEntry) -> String {
    let msg = &entry.message;
    format!(
        "{:>4}  {:<7}  {}  {}: {}",
        entry.position,
        msg.delivery_state.as_str(),
        msg.id, msg.conversation_id, msg.body
    )
}

pub fn format_conversation_line(conversation: &Conversation, messages: usize) -> String {
    let cursor = match conversation.last_sync_cursor {
        Some(cursor) => format!("cursor {cursor}"),
        None => "never synced".to_string(),
    };
    let mut line = format!("{}  {messages} messages, {cursor}", conversation.id);
    if !conversation.participant_ids.is_empty() {
        let members: Vec<&str> = conversation.participant_ids.iter().map(String::as_str).collect();
        line.push_str(&format!("  ({})", members.join(", ")));
    }
    line
}

pub fn format_peer_line(peer: &Peer) -> String {
    format!("{}  last seen {}", peer.id, peer.last_seen.format("%Y-%m-%d %H:%M"))
}

/// One-line summary of a sync run.
pub fn format_sync_summary(state: ConnectionState, status: &SyncStatus) -> String {
    let mut line = format!(
        "{state}: {}/{} conversations caught up, {} outstanding",
        status.caught_up.len(),
        status.subscribed.len(),
        status.outstanding
    );
    if let Some(error) = &status.last_error {
        line.push_str(&format!(" (last error: {error})"));
    }
    line
}

#[cfg(test)]
#[path = "display_tests.rs"]
mod tests;
