//! HTTP client for upstream dashboards
//!
//! Builds the `reqwest` client shared by every fetch of a collector.

use reqwest::{Client, Proxy};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Collector client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Optional proxy for all upstream traffic (e.g. http://127.0.0.1:3128)
    pub proxy: Option<String>,
    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// User agent sent upstream
    pub user_agent: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout_ms: 1000,
            user_agent: concat!("pulse-collect/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Why a single source could not be collected
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Upstream returned status {0}")]
    Status(u16),

    #[error("Unparsable payload: {0}")]
    Parse(String),
}

/// Create the HTTP client used for collection
pub fn create_client(config: &CollectorConfig) -> Result<Client, CollectError> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
        .user_agent(config.user_agent.as_str());

    builder = match &config.proxy {
        Some(addr) => {
            let proxy = Proxy::all(addr).map_err(|e| CollectError::ClientBuild(e.to_string()))?;
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    builder
        .build()
        .map_err(|e| CollectError::ClientBuild(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CollectorConfig::default();
        assert!(config.proxy.is_none());
        assert_eq!(config.connect_timeout_ms, 1000);
        assert!(config.user_agent.starts_with("pulse-collect/"));
    }

    #[test]
    fn test_create_client() {
        assert!(create_client(&CollectorConfig::default()).is_ok());

        let proxied = CollectorConfig {
            proxy: Some("http://127.0.0.1:3128".to_string()),
            ..Default::default()
        };
        assert!(create_client(&proxied).is_ok());
    }
}
