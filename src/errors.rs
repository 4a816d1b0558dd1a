// src/errors.rs

//! `CalcNodeError` and the `Result` alias used across the library. The
//! binary edge (`main`, `run`) works in `anyhow`.

use thiserror::Error;

use crate::protocol::ProtocolError;

#[derive(Error, Debug)]
pub enum CalcNodeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Configuration fetch failed: {0}")]
    FetchFailed(String),

    #[error("Configuration unavailable from {url} after {attempts} attempts")]
    ConfigurationUnavailable { url: String, attempts: u32 },

    #[error("Worker construction failed: {0}")]
    WorkerBuild(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Cycle detected in dependency graph: {0}")]
    DagCycle(String),

    #[error("Invalid dependency graph: {0}")]
    InvalidGraph(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CalcNodeError>;
