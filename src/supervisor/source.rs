// src/supervisor/source.rs

//! Where the worker configuration document comes from.
//!
//! The supervisor talks to a [`ConfigurationSource`] rather than to reqwest
//! directly, so tests can script fetch outcomes.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::{CalcNodeError, Result};

/// Boxed future returned by [`ConfigurationSource::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

/// Retrieves the raw configuration document.
///
/// Any failure (transport error, non-success status, unreadable file) means
/// "unavailable right now"; the supervisor decides whether to retry.
pub trait ConfigurationSource: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a>;
}

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches `http://` and `https://` URLs with reqwest.
#[derive(Debug, Clone)]
pub struct HttpConfigurationSource {
    client: reqwest::Client,
}

impl HttpConfigurationSource {
    pub fn new() -> Result<Self> {
        Self::with_timeout(HTTP_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("calcnode/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CalcNodeError::ConfigError(format!("creating HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl ConfigurationSource for HttpConfigurationSource {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a> {
        Box::pin(async move {
            let response = self.client.get(url).send().await.map_err(|e| {
                warn!(
                    url,
                    error = %e,
                    is_connect = e.is_connect(),
                    is_timeout = e.is_timeout(),
                    "configuration request failed"
                );
                CalcNodeError::FetchFailed(format!("request to {url} failed: {e}"))
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(CalcNodeError::FetchFailed(format!(
                    "HTTP {} from {url}",
                    status.as_u16()
                )));
            }

            let body = response.bytes().await.map_err(|e| {
                CalcNodeError::FetchFailed(format!("reading body from {url}: {e}"))
            })?;
            debug!(url, bytes = body.len(), "configuration fetched");
            Ok(body.to_vec())
        })
    }
}

/// Reads `file://` URLs from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileConfigurationSource;

impl ConfigurationSource for FileConfigurationSource {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a> {
        Box::pin(async move {
            let path = url.strip_prefix("file://").unwrap_or(url);
            tokio::fs::read(path).await.map_err(|e| {
                CalcNodeError::FetchFailed(format!("reading {path}: {e}"))
            })
        })
    }
}

/// Pick a source for the URL's scheme.
pub fn source_for_url(url: &str) -> Result<Box<dyn ConfigurationSource>> {
    let scheme = url
        .split_once("://")
        .map(|(scheme, _)| scheme.to_ascii_lowercase())
        .unwrap_or_default();
    match scheme.as_str() {
        "http" | "https" => Ok(Box::new(HttpConfigurationSource::new()?)),
        "file" => Ok(Box::new(FileConfigurationSource)),
        _ => Err(CalcNodeError::ConfigError(format!(
            "unsupported configuration URL '{url}'; expected http://, https:// or file://"
        ))),
    }
}
