// src/logging.rs

//! Process-wide `tracing` subscriber.
//!
//! The filter is resolved in this order:
//! 1. `--log-level`, applied to every target
//! 2. `CALCNODE_LOG`, any `EnvFilter` directive string
//!    (e.g. `info,calcnode::watchdog=debug`)
//! 3. `info`
//!
//! Everything is written to stderr so `--dry-run` output on stdout stays
//! clean. Worker threads are named `calcnode-worker-<n>` and the timer thread
//! `calcnode-watchdog`, so thread names are always printed.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "CALCNODE_LOG";

/// Install the global subscriber. Call once, from `main`.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = resolve_filter(cli_level, std::env::var(LOG_ENV_VAR).ok().as_deref());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("installing tracing subscriber")
}

fn resolve_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(directive(level));
    }
    env.and_then(|directives| EnvFilter::try_new(directives.trim()).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_level_wins_over_environment() {
        let filter = resolve_filter(Some(LogLevel::Debug), Some("error"));
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn environment_directives_are_used_verbatim() {
        let rendered = resolve_filter(None, Some(" warn,calcnode::watchdog=trace ")).to_string();
        assert!(rendered.contains("calcnode::watchdog=trace"), "{rendered}");
        assert!(rendered.contains("warn"), "{rendered}");
    }

    #[test]
    fn unparseable_environment_falls_back_to_info() {
        assert_eq!(resolve_filter(None, Some("calcnode=loud")).to_string(), "info");
        assert_eq!(resolve_filter(None, None).to_string(), "info");
    }
}
