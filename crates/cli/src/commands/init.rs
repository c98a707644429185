// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;

use pl_core::Store;

use crate::config::{db_path, init_data_dir};
use crate::error::Result;

pub fn run(data_dir: &Path, sender: &str, remote: Option<&str>) -> Result<()> {
    let config = init_data_dir(data_dir, sender, remote)?;

    // Create the database up front so later commands find the schema.
    Store::open(&db_path(data_dir))?;

    println!("Initialized parley at {}", data_dir.display());
    println!("Sender: {}", config.identity.sender_id);
    println!("Device: {}", config.identity.device_id);
    match config.remote_url() {
        Some(url) => println!("Remote: {url}"),
        None => println!("Remote: none (messages stay queued locally)"),
    }
    Ok(())
}

#[cfg(test)]
#[path = "init_tests.rs"]
mod tests;
