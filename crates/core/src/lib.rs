// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! pl-core: shared library for the parley messaging client and relay.
//!
//! This crate provides the message data model, HLC timestamps, the wire
//! protocol, and the SQLite-backed local message store used by both the
//! `parley` client and the `pl-remote` relay.

pub mod conversation;
pub mod error;
pub mod hlc;
pub mod message;
pub mod protocol;
pub mod store;

pub use conversation::{Conversation, Peer, SyncCursor};
pub use error::{Error, Result};
pub use hlc::{ClockSource, Hlc, HlcClock, SystemClock};
pub use message::{DeliveryState, Message, MessageId};
pub use protocol::{ClientFrame, Envelope, ServerFrame};
pub use store::{Applied, OutboxEntry, Store, StoreEvent, SubscriptionId, Window};
