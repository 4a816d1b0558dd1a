// src/config/validate.rs

use std::time::Duration;

use crate::config::connection::ConnectionDefaults;
use crate::config::duration::parse_duration;
use crate::config::model::{
    CoordinatorSettings, NodeSettings, PortValue, WorkerConfig, WorkerConfigFile,
};
use crate::errors::{CalcNodeError, Result};
use crate::transport::DEFAULT_MAX_FRAME_BYTES;

pub const DEFAULT_MAX_JOB_ITEM_EXECUTION: Duration = Duration::from_secs(60);
pub const DEFAULT_WATCHDOG_CHECK_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_TIMEOUT_GRACE_PERIOD: Duration = Duration::ZERO;
pub const DEFAULT_STATISTICS_INTERVAL: Duration = Duration::from_secs(30);

/// Validate a parsed document and fill in defaults.
///
/// Checks:
/// - `capacity >= 1` (default: available parallelism)
/// - durations parse and, apart from `timeout_grace_period`, are non-zero
/// - coordinator host is non-empty and port is in `1..=65535`
/// - `max_frame_bytes >= 1`
///
/// Missing coordinator fields fall back to `defaults`.
pub fn validate_config(
    file: &WorkerConfigFile,
    defaults: &ConnectionDefaults,
) -> Result<WorkerConfig> {
    Ok(WorkerConfig {
        node: validate_node(file)?,
        coordinator: validate_coordinator(file, defaults)?,
    })
}

fn validate_node(file: &WorkerConfigFile) -> Result<NodeSettings> {
    let node = &file.node;

    let id = match node.id.as_deref().map(str::trim) {
        Some("") => return Err(invalid("[node].id must not be empty")),
        Some(id) => id.to_string(),
        None => format!("calcnode-{}", std::process::id()),
    };

    let capacity = match node.capacity {
        Some(c) if c >= 1 => usize::try_from(c)
            .map_err(|_| invalid(format!("[node].capacity {c} is too large")))?,
        Some(c) => return Err(invalid(format!("[node].capacity must be >= 1 (got {c})"))),
        None => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    };

    Ok(NodeSettings {
        id,
        capacity,
        max_job_item_execution: non_zero(
            "max_job_item_execution",
            duration_field(
                "max_job_item_execution",
                node.max_job_item_execution.as_deref(),
                DEFAULT_MAX_JOB_ITEM_EXECUTION,
            )?,
        )?,
        watchdog_check_interval: non_zero(
            "watchdog_check_interval",
            duration_field(
                "watchdog_check_interval",
                node.watchdog_check_interval.as_deref(),
                DEFAULT_WATCHDOG_CHECK_INTERVAL,
            )?,
        )?,
        timeout_grace_period: duration_field(
            "timeout_grace_period",
            node.timeout_grace_period.as_deref(),
            DEFAULT_TIMEOUT_GRACE_PERIOD,
        )?,
        statistics_interval: non_zero(
            "statistics_interval",
            duration_field(
                "statistics_interval",
                node.statistics_interval.as_deref(),
                DEFAULT_STATISTICS_INTERVAL,
            )?,
        )?,
    })
}

fn validate_coordinator(
    file: &WorkerConfigFile,
    defaults: &ConnectionDefaults,
) -> Result<CoordinatorSettings> {
    let coordinator = &file.coordinator;

    let host = coordinator
        .host
        .as_deref()
        .map(str::trim)
        .unwrap_or(defaults.host.as_str())
        .to_string();
    if host.is_empty() {
        return Err(invalid("[coordinator].host must not be empty"));
    }

    let port = match &coordinator.port {
        Some(value) => parse_port(value)?,
        None => defaults.port.ok_or_else(|| {
            invalid("[coordinator].port is not set and cannot be derived from the configuration URL")
        })?,
    };
    if port == 0 {
        return Err(invalid("[coordinator].port must be in 1..=65535 (got 0)"));
    }

    let max_frame_bytes = coordinator.max_frame_bytes.unwrap_or(DEFAULT_MAX_FRAME_BYTES);
    if max_frame_bytes == 0 {
        return Err(invalid("[coordinator].max_frame_bytes must be >= 1"));
    }

    Ok(CoordinatorSettings {
        host,
        port,
        max_frame_bytes,
    })
}

fn parse_port(value: &PortValue) -> Result<u16> {
    let number = match value {
        PortValue::Number(n) => *n,
        PortValue::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| invalid(format!("[coordinator].port '{s}' is not a number: {e}")))?,
    };
    u16::try_from(number)
        .map_err(|_| invalid(format!("[coordinator].port must be in 1..=65535 (got {number})")))
}

fn duration_field(name: &str, raw: Option<&str>, default: Duration) -> Result<Duration> {
    match raw {
        Some(raw) => parse_duration(raw).map_err(|e| invalid(format!("[node].{name}: {e}"))),
        None => Ok(default),
    }
}

fn non_zero(name: &str, d: Duration) -> Result<Duration> {
    if d.is_zero() {
        return Err(invalid(format!("[node].{name} must be greater than zero")));
    }
    Ok(d)
}

fn invalid(message: impl Into<String>) -> CalcNodeError {
    CalcNodeError::ConfigError(message.into())
}
