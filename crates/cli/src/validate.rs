// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use pl_core::message::MAX_BODY_BYTES;

use crate::error::{Error, Result};

// Input length limits
pub const MAX_BODY_LENGTH: usize = MAX_BODY_BYTES;
pub const MAX_CONVERSATION_ID_LENGTH: usize = 128;
pub const MAX_SENDER_ID_LENGTH: usize = 64;

fn required<'a>(value: &'a str, field: &'static str, max: usize) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::FieldEmpty { field });
    }
    if trimmed.len() > max {
        return Err(Error::FieldTooLong { field, actual: trimmed.len(), max });
    }
    Ok(trimmed)
}

/// Validate a message body. Surrounding whitespace is kept; it must not be
/// the whole body.
pub fn validate_body(body: &str) -> Result<()> {
    if body.trim().is_empty() {
        return Err(Error::FieldEmpty { field: "Message body" });
    }
    if body.len() > MAX_BODY_LENGTH {
        return Err(Error::FieldTooLong {
            field: "Message body",
            actual: body.len(),
            max: MAX_BODY_LENGTH,
        });
    }
    Ok(())
}

/// Validate and trim a conversation id.
pub fn validate_conversation_id(id: &str) -> Result<&str> {
    required(id, "Conversation id", MAX_CONVERSATION_ID_LENGTH)
}

/// Validate and trim a sender (or participant) id.
pub fn validate_sender_id(id: &str) -> Result<&str> {
    required(id, "Sender id", MAX_SENDER_ID_LENGTH)
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
