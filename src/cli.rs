// src/cli.rs

//! CLI argument parsing using `clap`.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::config::parse_duration;

/// Command-line arguments for `calcnode`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "calcnode",
    version,
    about = "Calculation grid node: fetches its configuration, runs the worker, retires on change.",
    long_about = None
)]
pub struct CliArgs {
    /// URL of the worker configuration document (http://, https:// or file://).
    #[arg(value_name = "CONFIGURATION_URL")]
    pub configuration_url: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CALCNODE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// How often to re-fetch the configuration. Must be non-zero.
    #[arg(long, value_name = "DURATION", default_value = "60s", value_parser = parse_non_zero_duration)]
    pub poll_interval: Duration,

    /// Attempts at fetching the configuration on startup.
    #[arg(long, value_name = "N", default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    pub startup_retries: u32,

    /// Pause between startup attempts.
    #[arg(long, value_name = "DURATION", default_value = "3s", value_parser = parse_duration)]
    pub retry_sleep: Duration,

    /// Consecutive failed polls after which the node retires.
    #[arg(long, value_name = "N", default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
    pub failures_before_shutdown: u32,

    /// Fetch, substitute and validate the configuration, print it, and exit.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_non_zero_duration(s: &str) -> Result<Duration, String> {
    let duration = parse_duration(s)?;
    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(duration)
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
