// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;

/// Worker configuration document as read from TOML, after placeholder
/// substitution.
///
/// ```toml
/// [node]
/// id = "node-a"
/// capacity = 4
/// max_job_item_execution = "60s"
/// watchdog_check_interval = "1s"
/// timeout_grace_period = "0s"
/// statistics_interval = "30s"
///
/// [coordinator]
/// host = "${calcnode.host}"
/// port = "${calcnode.port}"
/// max_frame_bytes = 16777216
/// ```
///
/// Every field is optional; see [`crate::config::validate`] for defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfigFile {
    #[serde(default)]
    pub node: NodeSection,

    #[serde(default)]
    pub coordinator: CoordinatorSection,
}

/// `[node]` section. Durations are `<n>ms|s|m|h` strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSection {
    pub id: Option<String>,
    pub capacity: Option<i64>,
    pub max_job_item_execution: Option<String>,
    pub watchdog_check_interval: Option<String>,
    pub timeout_grace_period: Option<String>,
    pub statistics_interval: Option<String>,
}

/// `[coordinator]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorSection {
    pub host: Option<String>,
    pub port: Option<PortValue>,
    pub max_frame_bytes: Option<usize>,
}

/// Ports usually arrive quoted, since they come from `${calcnode.port}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(i64),
    Text(String),
}

/// Validated worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub node: NodeSettings,
    pub coordinator: CoordinatorSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSettings {
    pub id: String,
    /// Number of worker threads.
    pub capacity: usize,
    pub max_job_item_execution: Duration,
    pub watchdog_check_interval: Duration,
    /// How long worker threads get to wind down after a timeout before the
    /// process is terminated. Zero means terminate immediately.
    pub timeout_grace_period: Duration,
    pub statistics_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub host: String,
    pub port: u16,
    pub max_frame_bytes: usize,
}
