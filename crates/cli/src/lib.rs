// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! parley - an offline-first chat client core with relay sync.
//!
//! Messages are written to a local SQLite store first and delivered to the
//! relay in the background, so sending never waits on the network.
//!
//! # Main Components
//!
//! - [`ChatClient`] - the UI-facing API: send, observe, join, retry, sync
//! - [`OutboundQueue`] - durable FIFO of messages waiting for the relay
//! - [`ConversationFeed`] - live, ordered view of one conversation
//! - [`sync`] - connection supervisor and sync engine
//! - [`Config`] - device identity and relay settings
//! - [`Error`] - error taxonomy for every operation
//!
//! # Usage
//!
//! ```rust,ignore
//! use parley::{init_data_dir, ChatClient};
//!
//! init_data_dir(&dir, "alice", Some("ws://localhost:7420"))?;
//! let client = ChatClient::open(&dir)?;
//! let mut feed = client.observe_conversation("general")?;
//! client.send_message("general", "hello")?;
//! client.start_sync()?;
//! let messages = feed.changed().await?;
//! ```

mod cli;
mod commands;
mod display;
mod validate;

pub mod client;
pub mod config;
pub mod env;
pub mod error;
pub mod observe;
pub mod outbox;
pub mod sync;

pub use cli::{Cli, Command, OutputFormat};
pub use client::ChatClient;
pub use config::{db_path, init_data_dir, resolve_data_dir, Config, Identity, RemoteConfig};
pub use error::{Error, ErrorKind, Result};
pub use observe::ConversationFeed;
pub use outbox::{Drain, OutboundQueue};

/// Execute a parsed command line. This is the main entry point for the
/// binary and provides a testable way to run commands without process
/// execution.
pub fn run(cli: Cli) -> Result<()> {
    let data_dir = resolve_data_dir(cli.dir.as_deref());
    match cli.command {
        Command::Init { sender, remote } => {
            commands::init::run(&data_dir, &sender, remote.as_deref())
        }
        Command::Join { conversation, participants } => {
            commands::join::run(&data_dir, &conversation, &participants)
        }
        Command::Send { conversation, body } => {
            commands::send::run(&data_dir, &conversation, &body)
        }
        Command::Log { conversation, limit, output } => {
            commands::log::run(&data_dir, &conversation, limit, output)
        }
        Command::Outbox { output } => commands::outbox::run(&data_dir, output),
        Command::Retry { id } => commands::retry::run(&data_dir, &id),
        Command::Status { output } => commands::status::run(&data_dir, output),
        Command::Sync { follow, timeout } => commands::sync::run(&data_dir, follow, timeout),
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
