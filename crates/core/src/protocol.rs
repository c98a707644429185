// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket frames exchanged between a device and the relay.
//!
//! Every frame is a JSON object tagged by `"type"`. A session looks like:
//!
//! ```text
//! client                          server
//!   hello {device, sender}  ──▶
//!                           ◀──  welcome {session_id}
//!   subscribe {conv, cursor}──▶
//!                           ◀──  event {conv, seq, message}   (replay)
//!                           ◀──  cursor_update {conv, cursor} (caught up)
//!   publish {envelope}      ──▶
//!                           ◀──  ack {message_id, conv, seq}
//!                           ◀──  event {conv, seq, message}   (fan-out)
//! ```

use serde::{Deserialize, Serialize};

use crate::conversation::SyncCursor;
use crate::hlc::Hlc;
use crate::message::{DeliveryState, Message, MessageId};

/// The wire form of a message. Delivery state and sequence never travel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: MessageId,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    pub created_at: Hlc,
}

impl Envelope {
    /// Materializes an inbound envelope as an acknowledged, sequenced message.
    pub fn into_message(self, seq: u64) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            body: self.body,
            created_at: self.created_at,
            seq: Some(seq),
            delivery_state: DeliveryState::Acknowledged,
        }
    }
}

impl From<&Message> for Envelope {
    fn from(msg: &Message) -> Self {
        Envelope {
            id: msg.id.clone(),
            conversation_id: msg.conversation_id.clone(),
            sender_id: msg.sender_id.clone(),
            body: msg.body.clone(),
            created_at: msg.created_at,
        }
    }
}

/// Frames sent from a device to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame of every session.
    Hello { device_id: String, sender_id: String },

    /// Start receiving a conversation's events after `cursor`.
    ///
    /// Without a cursor the whole history is replayed.
    Subscribe {
        conversation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cursor: Option<SyncCursor>,
    },

    /// Submit a locally authored message.
    Publish { envelope: Envelope },

    /// Keepalive. Echoed back in a `pong`.
    Ping { id: u64 },
}

/// Frames sent from the relay to a device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake accepted.
    Welcome { session_id: String },

    /// A sequenced message in a subscribed conversation.
    Event { conversation_id: String, seq: u64, message: Envelope },

    /// The relay has sequenced one of our publishes.
    Ack { message_id: MessageId, conversation_id: String, seq: u64 },

    /// The relay refused one of our publishes. Not retried automatically.
    Reject { message_id: MessageId, reason: String },

    /// Replay of a subscription is complete up to `cursor`.
    CursorUpdate { conversation_id: String, cursor: SyncCursor },

    Pong { id: u64 },

    Error { message: String },
}

impl ClientFrame {
    pub fn hello(device_id: impl Into<String>, sender_id: impl Into<String>) -> Self {
        ClientFrame::Hello { device_id: device_id.into(), sender_id: sender_id.into() }
    }

    pub fn subscribe(conversation_id: impl Into<String>, cursor: Option<SyncCursor>) -> Self {
        ClientFrame::Subscribe { conversation_id: conversation_id.into(), cursor }
    }

    pub fn publish(msg: &Message) -> Self {
        ClientFrame::Publish { envelope: Envelope::from(msg) }
    }

    pub fn ping(id: u64) -> Self {
        ClientFrame::Ping { id }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerFrame {
    pub fn event(seq: u64, message: Envelope) -> Self {
        ServerFrame::Event { conversation_id: message.conversation_id.clone(), seq, message }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error { message: message.into() }
    }

    /// Conversation the frame belongs to, for frames routed per conversation.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            ServerFrame::Event { conversation_id, .. }
            | ServerFrame::Ack { conversation_id, .. }
            | ServerFrame::CursorUpdate { conversation_id, .. } => Some(conversation_id),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
