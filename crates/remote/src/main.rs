// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! pl-remote: WebSocket relay for parley devices.
//!
//! The relay assigns every published message a per-conversation sequence
//! id, records it in an fsynced event log, acknowledges the publisher and
//! fans the event out to subscribed devices.

mod log;
mod server;
mod state;

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// pl-remote: parley relay server
#[derive(Parser, Debug)]
#[command(name = "pl-remote")]
#[command(about = "WebSocket relay that sequences and fans out parley messages")]
struct Args {
    /// Address to bind the server to
    #[arg(short, long, default_value = "0.0.0.0:7420")]
    bind: SocketAddr,

    /// Directory for the event log
    #[arg(short, long, default_value = ".")]
    data: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // PARLEY_LOG overrides the level picked by --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = std::env::var("PARLEY_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    info!("Starting pl-remote server");
    info!("  Bind address: {}", args.bind);
    info!("  Data directory: {}", args.data.display());

    let state = state::RelayState::new(&args.data)?;
    info!("  Logged messages: {}", state.message_count().await);

    server::run(args.bind, state).await
}
