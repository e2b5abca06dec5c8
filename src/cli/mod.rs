//! Command-line interface for the sanity harness.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
