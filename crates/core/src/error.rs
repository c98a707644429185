// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for pl-core operations.
//!
//! Everything here is a storage-side failure from the point of view of the
//! sync core: the local store could not read, write or interpret its data.

use thiserror::Error;

/// All possible errors that can occur in pl-core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("duplicate message id: {0}\n  hint: message ids are assigned once and never reused")]
    DuplicateMessage(String),

    #[error("invalid delivery transition: cannot go from {from} to {to}\n  hint: from '{from}' you can go to: {valid_targets}")]
    InvalidTransition {
        from: String,
        to: String,
        valid_targets: String,
    },

    #[error(
        "invalid delivery state: '{0}'\n  hint: valid states are: pending, sent, acknowledged, failed"
    )]
    InvalidDeliveryState(String),

    #[error("invalid HLC: {0}")]
    InvalidHlc(String),

    #[error("invalid sync cursor: '{0}'")]
    InvalidCursor(String),

    #[error("unsupported schema version {found} (this build understands up to {supported})")]
    UnsupportedSchema { found: i64, supported: i64 },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupted data: {0}")]
    CorruptedData(String),
}

/// A specialized Result type for pl-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
