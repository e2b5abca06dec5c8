//! sanity CLI entry point.
//!
//! Initializes logging and delegates to the CLI module for command handling.

use std::process::ExitCode;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Parse CLI arguments first to get log_level
    let cli = sanity_harness::cli::parse_cli();

    // Priority: RUST_LOG env var > --log-level CLI arg > default
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    sanity_harness::cli::run_with_cli(cli).await
}
