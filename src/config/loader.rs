// src/config/loader.rs

use std::collections::BTreeMap;

use regex::{Captures, Regex};
use tracing::debug;

use crate::config::connection::ConnectionDefaults;
use crate::config::model::{WorkerConfig, WorkerConfigFile};
use crate::config::validate::validate_config;
use crate::errors::{CalcNodeError, Result};

const PLACEHOLDER_PATTERN: &str = r"\$\{([A-Za-z0-9_.\-]+)\}";

/// Replace every `${name}` with `properties[name]`.
///
/// An unknown placeholder is an error; nothing is left unsubstituted.
pub fn substitute_placeholders(
    document: &str,
    properties: &BTreeMap<String, String>,
) -> Result<String> {
    let pattern = Regex::new(PLACEHOLDER_PATTERN)
        .map_err(|e| CalcNodeError::ConfigError(format!("placeholder pattern: {e}")))?;

    let mut unknown: Vec<String> = Vec::new();
    let substituted = pattern.replace_all(document, |caps: &Captures<'_>| {
        let name = &caps[1];
        match properties.get(name) {
            Some(value) => value.clone(),
            None => {
                unknown.push(name.to_string());
                caps[0].to_string()
            }
        }
    });

    if !unknown.is_empty() {
        unknown.sort();
        unknown.dedup();
        return Err(CalcNodeError::ConfigError(format!(
            "unknown configuration placeholder(s): {}",
            unknown
                .iter()
                .map(|n| format!("${{{n}}}"))
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }
    Ok(substituted.into_owned())
}

/// Parse the document without semantic validation.
pub fn parse_document(document: &str) -> Result<WorkerConfigFile> {
    Ok(toml::from_str(document)?)
}

/// Decode, substitute, parse and validate a fetched configuration document.
pub fn load_worker_config(bytes: &[u8], defaults: &ConnectionDefaults) -> Result<WorkerConfig> {
    let document = std::str::from_utf8(bytes)
        .map_err(|e| CalcNodeError::ConfigError(format!("configuration is not UTF-8: {e}")))?;
    let substituted = substitute_placeholders(document, &defaults.properties())?;
    let file = parse_document(&substituted)?;
    let config = validate_config(&file, defaults)?;
    debug!(fingerprint = %fingerprint(bytes), node = %config.node.id, "worker configuration loaded");
    Ok(config)
}

/// Short content hash of a configuration document, for logs.
pub fn fingerprint(bytes: &[u8]) -> String {
    let hash = blake3::hash(bytes).to_hex();
    hash[..16].to_string()
}
