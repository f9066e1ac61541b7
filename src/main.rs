//! # Scenarist
//!
//! Operator CLI for the scenario reconciler.
//!
//! - `render` shows the job a manifest turns into
//! - `check` runs one live monitor check
//! - `simulate` drives a manifest through the reconciler in memory

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![forbid(clippy::expect_used)]

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    commands::execute_command(cli.command).await
}

/// Initialize tracing with `RUST_LOG`, defaulting to `info`.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
