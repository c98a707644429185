// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use clap::Parser;
use parley::Cli;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(e) = parley::run(cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

/// `PARLEY_LOG` wins; otherwise warnings only, or debug output for parley
/// itself with `--verbose`.
fn init_logging(verbose: bool) {
    let filter = match parley::env::log_filter() {
        Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("warn")),
        None if verbose => EnvFilter::new("warn,parley=debug"),
        None => EnvFilter::new("warn"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
