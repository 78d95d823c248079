//! # hutch
//!
//! Daemon-less container runtime for a single Linux host.
//! One binary runs, inspects, and removes containers and their networks,
//! and doubles as the in-container init.

#![allow(clippy::print_stdout, clippy::print_stderr)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    commands::execute(cli)
}

/// Logs go to stderr so container output on stdout stays clean.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
