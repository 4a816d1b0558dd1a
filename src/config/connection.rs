// src/config/connection.rs

use std::collections::BTreeMap;

use reqwest::Url;

use crate::errors::{CalcNodeError, Result};

/// Property holding the host the configuration was fetched from.
pub const HOST_PROPERTY: &str = "calcnode.host";
/// Property holding the port the configuration was fetched from.
pub const PORT_PROPERTY: &str = "calcnode.port";

/// Where the coordinator most likely lives, derived from the configuration
/// URL. Published to the configuration document as [`HOST_PROPERTY`] and
/// [`PORT_PROPERTY`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDefaults {
    pub host: String,
    /// Explicit port, else the scheme's default. `None` for schemes without
    /// one (`file`).
    pub port: Option<u16>,
}

impl ConnectionDefaults {
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| CalcNodeError::ConfigError(format!("invalid configuration URL '{url}': {e}")))?;

        let host = match parsed.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ if parsed.scheme() == "file" => "localhost".to_string(),
            _ => {
                return Err(CalcNodeError::ConfigError(format!(
                    "configuration URL '{url}' has no host"
                )));
            }
        };

        Ok(Self {
            host,
            port: parsed.port_or_known_default(),
        })
    }

    /// Substitution properties for the configuration document.
    pub fn properties(&self) -> BTreeMap<String, String> {
        let mut properties = BTreeMap::new();
        properties.insert(HOST_PROPERTY.to_string(), self.host.clone());
        if let Some(port) = self.port {
            properties.insert(PORT_PROPERTY.to_string(), port.to_string());
        }
        properties
    }
}
