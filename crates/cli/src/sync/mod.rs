// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Relay synchronization.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐ events ┌──────────────┐     ┌─────────────┐
//! │ Supervisor  │───────►│  SyncEngine  │────►│   Store     │
//! │ (backoff,   │        │ (replay, ack,│◄────│  + Outbox   │
//! │  handshake) │        │  merge)      │     └─────────────┘
//! └─────────────┘        └──────────────┘
//!        │ owns                 │ borrows per session
//!        ▼                      ▼
//! ┌─────────────────────────────────────┐     ┌─────────────┐
//! │         Transport (trait)           │────►│    Relay    │
//! └─────────────────────────────────────┘◄────│ (pl-remote) │
//!                                             └─────────────┘
//! ```
//!
//! # Features
//!
//! - WebSocket connection to the relay, injectable for tests
//! - Reconnect with full-jitter exponential backoff
//! - Outbox replay on every connect, in enqueue order
//! - Resume from per-conversation cursors, discarding replayed events
//! - One worker task per conversation for inbound events
//! - Heartbeats that degrade, then drop, a silent session

mod backoff;
mod engine;
mod supervisor;
mod transport;

pub use backoff::Backoff;
pub use engine::{EngineConfig, SyncEngine, SyncStatus};
pub use supervisor::{
    ConnectionState, ConnectionSupervisor, SessionHandle, SupervisorConfig, SupervisorEvent,
};
pub use transport::{
    websocket_factory, Transport, TransportError, TransportFactory, TransportResult,
    WebSocketTransport,
};

#[cfg(test)]
pub(crate) mod test_helpers;
