// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Messages and their delivery lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::hlc::Hlc;

/// Largest message body accepted by clients and the relay.
pub const MAX_BODY_BYTES: usize = 4096;

/// Client-generated, globally unique message identifier.
///
/// Assigned once when the message is composed and never changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generates a fresh random (v4 UUID) identifier.
    pub fn generate() -> Self {
        MessageId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        MessageId(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId(s.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a message is on its way to (or from) the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Authored locally, not yet written to a stream.
    Pending,
    /// Written to a stream, waiting for the remote acknowledgment.
    Sent,
    /// Sequenced by the remote service. Terminal.
    Acknowledged,
    /// Rejected by the remote service. Can be retried.
    Failed,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Sent => "sent",
            DeliveryState::Acknowledged => "acknowledged",
            DeliveryState::Failed => "failed",
        }
    }

    /// Check if moving from this state to `target` is allowed.
    ///
    /// States only move forward, except `Failed -> Pending` on retry.
    /// Staying in the same state is not a transition; callers treat it as a
    /// no-op.
    pub fn can_transition_to(&self, target: DeliveryState) -> bool {
        use DeliveryState::*;
        matches!(
            (self, target),
            (Pending, Sent | Acknowledged | Failed) | (Sent, Acknowledged | Failed) | (Failed, Pending)
        )
    }

    pub fn valid_targets(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "sent, acknowledged, failed",
            DeliveryState::Sent => "acknowledged, failed",
            DeliveryState::Acknowledged => "(none)",
            DeliveryState::Failed => "pending (retry)",
        }
    }

    /// Validates `self -> target`, returning whether anything changes.
    pub fn check_transition(&self, target: DeliveryState) -> Result<bool> {
        if *self == target {
            return Ok(false);
        }
        if !self.can_transition_to(target) {
            return Err(Error::InvalidTransition {
                from: self.to_string(),
                to: target.to_string(),
                valid_targets: self.valid_targets().to_string(),
            });
        }
        Ok(true)
    }

    /// True while the message still waits on the remote service.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, DeliveryState::Pending | DeliveryState::Sent)
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(DeliveryState::Pending),
            "sent" => Ok(DeliveryState::Sent),
            "acknowledged" | "acked" => Ok(DeliveryState::Acknowledged),
            "failed" => Ok(DeliveryState::Failed),
            _ => Err(Error::InvalidDeliveryState(s.to_string())),
        }
    }
}

/// A chat message as held by the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    /// Logical creation time on the authoring device.
    pub created_at: Hlc,
    /// Server-assigned position in the conversation, once sequenced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    pub delivery_state: DeliveryState,
}

impl Message {
    /// A freshly authored local message in `Pending` state.
    pub fn compose(
        conversation_id: impl Into<String>,
        sender_id: impl Into<String>,
        body: impl Into<String>,
        created_at: Hlc,
    ) -> Self {
        Message {
            id: MessageId::generate(),
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            body: body.into(),
            created_at,
            seq: None,
            delivery_state: DeliveryState::Pending,
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
