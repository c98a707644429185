// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

use crate::sync::TransportError;

/// All possible errors that can occur in the parley library.
///
/// Transport and protocol failures are handled inside the sync layer and
/// only show up here for callers that drive a session directly. Storage
/// failures reach the caller of `send_message` synchronously.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not initialized: run 'parley init' first")]
    NotInitialized,

    #[error("already initialized at {0}")]
    AlreadyInitialized(String),

    #[error("no remote configured\n  hint: add a [remote] section with a url to config.toml")]
    NoRemote,

    #[error("{field} cannot be empty")]
    FieldEmpty { field: &'static str },

    #[error("{field} is too long ({actual} bytes, max {max})")]
    FieldTooLong { field: &'static str, actual: usize, max: usize },

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("invalid delivery transition: cannot go from {from} to {to}\n  hint: from '{from}' you can go to: {valid_targets}")]
    InvalidTransition { from: String, to: String, valid_targets: String },

    #[error("storage error: {0}")]
    Storage(pl_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("sync worker for '{0}' stopped")]
    WorkerStopped(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("sync engine stopped")]
    Stopped,

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Which side of the system an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network trouble. The supervisor reconnects.
    Transport,
    /// Local persistence failed. Retried, then surfaced.
    Storage,
    /// The relay sent something we cannot interpret. The session is reset.
    Protocol,
    /// Concurrent writers disagreed. Not produced by single-writer sync.
    Conflict,
    /// Bad input or setup from the caller.
    Usage,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(_) | Error::Timeout(_) => ErrorKind::Transport,
            Error::Storage(_) | Error::Io(_) | Error::WorkerStopped(_) => ErrorKind::Storage,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::NotInitialized
            | Error::AlreadyInitialized(_)
            | Error::NoRemote
            | Error::FieldEmpty { .. }
            | Error::FieldTooLong { .. }
            | Error::MessageNotFound(_)
            | Error::InvalidTransition { .. }
            | Error::Stopped
            | Error::Config(_)
            | Error::Json(_) => ErrorKind::Usage,
        }
    }
}

impl From<pl_core::Error> for Error {
    fn from(e: pl_core::Error) -> Self {
        match e {
            pl_core::Error::MessageNotFound(id) => Error::MessageNotFound(id),
            pl_core::Error::InvalidTransition { from, to, valid_targets } => {
                Error::InvalidTransition { from, to, valid_targets }
            }
            other => Error::Storage(other),
        }
    }
}

/// A specialized Result type for parley operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
