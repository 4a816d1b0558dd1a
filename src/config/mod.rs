// src/config/mod.rs

//! Worker configuration document.
//!
//! Responsibilities:
//! - Derive connection defaults from the configuration URL (`connection.rs`).
//! - Substitute `${...}` placeholders and parse TOML (`loader.rs`).
//! - Define the TOML-backed data model and the validated form (`model.rs`).
//! - Validate and apply defaults (`validate.rs`).

pub mod connection;
pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use connection::{ConnectionDefaults, HOST_PROPERTY, PORT_PROPERTY};
pub use duration::{format_duration, parse_duration};
pub use loader::{fingerprint, load_worker_config, parse_document, substitute_placeholders};
pub use model::{CoordinatorSettings, NodeSettings, WorkerConfig, WorkerConfigFile};
pub use validate::validate_config;
