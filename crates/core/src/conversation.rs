// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Conversations, their sync cursors, and known peers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Server-issued marker of the last inbound position applied locally.
///
/// Opaque to callers: it can be persisted, compared against an event's
/// sequence id with [`SyncCursor::covers`], and sent back on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(u64);

impl SyncCursor {
    /// Cursor positioned at the event with sequence id `seq`.
    pub fn at(seq: u64) -> Self {
        SyncCursor(seq)
    }

    /// True if the event with sequence id `seq` was already applied.
    pub fn covers(&self, seq: u64) -> bool {
        seq <= self.0
    }

    /// The raw position, for the wire and for storage.
    pub fn position(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SyncCursor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse().map(SyncCursor).map_err(|_| Error::InvalidCursor(s.to_string()))
    }
}

/// A conversation the local device takes part in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub participant_ids: BTreeSet<String>,
    /// Absent until the first inbound event has been applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_cursor: Option<SyncCursor>,
}

impl Conversation {
    pub fn new(id: impl Into<String>) -> Self {
        Conversation { id: id.into(), participant_ids: BTreeSet::new(), last_sync_cursor: None }
    }
}

/// A remote sender we have received messages from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[cfg(test)]
#[path = "conversation_tests.rs"]
mod tests;
