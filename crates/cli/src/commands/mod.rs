// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

pub mod init;
pub mod join;
pub mod log;
pub mod outbox;
pub mod retry;
pub mod send;
pub mod status;
pub mod sync;
#[cfg(test)]
#[path = "mod_tests.rs"]
pub mod testing;

use std::path::Path;

use crate::client::ChatClient;
use crate::error::Result;

/// Helper to open the device for a command.
pub fn open_client(data_dir: &Path) -> Result<ChatClient> {
    ChatClient::open(data_dir)
}
