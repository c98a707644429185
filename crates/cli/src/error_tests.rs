// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use yare::parameterized;

#[test]
fn not_initialized_mentions_init() {
    assert!(Error::NotInitialized.to_string().contains("parley init"));
}

#[test]
fn field_too_long_reports_sizes() {
    let err = Error::FieldTooLong { field: "Message body", actual: 5000, max: 4096 };
    let msg = err.to_string();
    assert!(msg.contains("5000"));
    assert!(msg.contains("4096"));
}

#[test]
fn core_not_found_maps_to_cli_variant() {
    let err: Error = pl_core::Error::MessageNotFound("m-1".into()).into();
    assert!(matches!(err, Error::MessageNotFound(ref id) if id == "m-1"));
}

#[test]
fn core_transition_keeps_hint() {
    let err: Error = pl_core::Error::InvalidTransition {
        from: "acknowledged".into(),
        to: "pending".into(),
        valid_targets: "(none)".into(),
    }
    .into();
    assert!(err.to_string().contains("hint"));
}

#[test]
fn other_core_errors_are_storage() {
    let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
    let err: Error = pl_core::Error::Io(io).into();
    assert!(matches!(err, Error::Storage(_)));
    assert_eq!(err.kind(), ErrorKind::Storage);
}

#[parameterized(
    transport = { Error::Transport(TransportError::ConnectionClosed), ErrorKind::Transport },
    timeout = { Error::Timeout("handshake".into()), ErrorKind::Transport },
    protocol = { Error::Protocol("bad frame".into()), ErrorKind::Protocol },
    conflict = { Error::Conflict("two writers".into()), ErrorKind::Conflict },
    worker = { Error::WorkerStopped("general".into()), ErrorKind::Storage },
    usage = { Error::NoRemote, ErrorKind::Usage },
)]
fn error_kinds(err: Error, kind: ErrorKind) {
    assert_eq!(err.kind(), kind);
}
