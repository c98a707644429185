// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Parse a string that must not be empty or whitespace-only.
fn non_empty_string(s: &str) -> Result<String, String> {
    if s.trim().is_empty() {
        Err("cannot be empty".to_string())
    } else {
        Ok(s.to_string())
    }
}

/// Output format for commands supporting structured output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

// Custom help template that groups commands into sections
const HELP_TEMPLATE: &str = "{about-with-newline}
{usage-heading} {usage}

{before-help}Options:
{options}{after-help}";

const COMMANDS_HELP: &str = "\
Messaging:
  send        Queue a message for delivery
  log         Show a conversation
  join        Take part in a conversation
  retry       Requeue a message the relay rejected

Sync:
  sync        Deliver queued messages and fetch new ones
  outbox      List messages waiting for the relay
  status      Show conversations, cursors and peers

Setup:
  init        Set up this device
";

const QUICKSTART_HELP: &str = "\
Quickstart:
  parley init --sender alice --remote ws://localhost:7420
  parley send general \"hello\"
  parley sync
  parley log general";

#[derive(Parser)]
#[command(name = "parley")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Offline-first chat client with relay sync")]
#[command(help_template = HELP_TEMPLATE)]
#[command(before_help = COMMANDS_HELP)]
#[command(after_help = QUICKSTART_HELP)]
pub struct Cli {
    /// Data directory (defaults to $PARLEY_DIR, then the platform data dir)
    #[arg(short = 'd', long = "dir", global = true, value_name = "path")]
    pub dir: Option<PathBuf>,

    /// Log sync activity to stderr
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Set up this device
    #[command(after_help = "\
Examples:
  parley init --sender alice                          Local only
  parley init --sender alice --remote ws://host:7420  With a relay")]
    Init {
        /// Name other participants see
        #[arg(long, short, value_parser = non_empty_string)]
        sender: String,

        /// Relay WebSocket URL
        #[arg(long, short)]
        remote: Option<String>,
    },

    /// Take part in a conversation
    #[command(arg_required_else_help = true)]
    Join {
        #[arg(value_parser = non_empty_string)]
        conversation: String,

        /// Other participants
        participants: Vec<String>,
    },

    /// Queue a message for delivery
    #[command(arg_required_else_help = true)]
    Send {
        #[arg(value_parser = non_empty_string)]
        conversation: String,

        /// Message text
        body: String,
    },

    /// Show a conversation
    #[command(arg_required_else_help = true)]
    Log {
        #[arg(value_parser = non_empty_string)]
        conversation: String,

        /// Show only the last N messages (0 = all)
        #[arg(long, short = 'n', default_value = "50")]
        limit: usize,

        /// Output format (text, json)
        #[arg(long = "output", short = 'o', value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// List messages waiting for the relay
    Outbox {
        /// Output format (text, json)
        #[arg(long = "output", short = 'o', value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Requeue a message the relay rejected
    #[command(arg_required_else_help = true)]
    Retry {
        /// Message id
        id: String,
    },

    /// Show conversations, cursors and peers
    Status {
        /// Output format (text, json)
        #[arg(long = "output", short = 'o', value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Deliver queued messages and fetch new ones
    #[command(after_help = "\
Examples:
  parley sync               Sync once, wait until caught up
  parley sync --timeout 30  Allow up to 30 seconds
  parley sync --follow      Stay connected and print new messages")]
    Sync {
        /// Stay connected until interrupted
        #[arg(long, short)]
        follow: bool,

        /// Seconds to wait for catch-up (defaults to remote.sync_timeout_secs)
        #[arg(long, short)]
        timeout: Option<u64>,
    },
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
