//! Client configuration.
//!
//! Values come from three layers:
//! - Built-in defaults
//! - A TOML file
//! - Environment variable overrides (prefix: `GRAPHPS__`)
//!
//! # Environment Variables
//!
//! - `GRAPHPS__CLUSTER__CLIENT_ID=3`
//! - `GRAPHPS__CLUSTER__SHARD_COUNT=1000`
//! - `GRAPHPS__CLUSTER__SERVERS=10.0.0.1:8500,10.0.0.2:8500`
//! - `GRAPHPS__RPC__CALL_TIMEOUT_MS=2000`
//! - `GRAPHPS__LOGGING__LEVEL=debug`
//!
//! # Example
//!
//! ```toml
//! [cluster]
//! client_id = 0
//! shard_count = 1000
//! servers = ["10.0.0.1:8500", "10.0.0.2:8500"]
//!
//! [rpc]
//! call_timeout_ms = 2000
//! ```

use crate::sharding::ServerIndex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration and topology errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid topology: {shard_count} shards over {server_count} servers")]
    InvalidTopology { shard_count: u32, server_count: u32 },

    #[error("Client is not initialized with a shard count")]
    NotInitialized,

    #[error("Client is already initialized")]
    AlreadyInitialized,

    #[error("Server index {server} out of range for {server_count} servers")]
    ServerOutOfRange {
        server: ServerIndex,
        server_count: usize,
    },

    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Root configuration of a graph sampling client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Cluster layout
    pub cluster: ClusterConfig,
    /// Call behavior
    pub rpc: RpcConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ClientConfig {
    /// Loads configuration from an optional file path with environment variable overrides.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (GRAPHPS__*)
    /// 2. Configuration file (if provided and present)
    /// 3. Built-in defaults
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(file_path) = path {
            if Path::new(file_path).exists() {
                let contents = std::fs::read_to_string(file_path)?;
                config = Self::from_toml(&contents)?;
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Parses a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Serializes the configuration to TOML format.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Applies `GRAPHPS__*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup using the environment variable names.
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Cluster overrides
        if let Some(v) = lookup("GRAPHPS__CLUSTER__CLIENT_ID").and_then(|v| v.parse().ok()) {
            self.cluster.client_id = v;
        }
        if let Some(v) = lookup("GRAPHPS__CLUSTER__SHARD_COUNT").and_then(|v| v.parse().ok()) {
            self.cluster.shard_count = Some(v);
        }
        if let Some(val) = lookup("GRAPHPS__CLUSTER__SERVERS") {
            self.cluster.servers = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        // Rpc overrides
        if let Some(v) = lookup("GRAPHPS__RPC__CALL_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.rpc.call_timeout_ms = v;
        }
        if let Some(v) = lookup("GRAPHPS__RPC__CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.rpc.connect_timeout_ms = v;
        }

        // Logging overrides
        if let Some(val) = lookup("GRAPHPS__LOGGING__LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = lookup("GRAPHPS__LOGGING__JSON") {
            self.logging.json = val.to_lowercase() == "true" || val == "1";
        }
    }
}

/// Cluster layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Identifier sent with every request
    pub client_id: u32,
    /// Total number of graph shards; the client initializes itself when set
    pub shard_count: Option<u32>,
    /// Server addresses in server index order
    pub servers: Vec<String>,
}

/// Call behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Per-call timeout in milliseconds
    pub call_timeout_ms: u64,
    /// Connection timeout in milliseconds, read by transports that dial
    pub connect_timeout_ms: u64,
}

impl RpcConfig {
    /// Per-call timeout. Zero is raised to one millisecond.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms.max(1))
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5_000,
            connect_timeout_ms: 1_000,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Use JSON format for log output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.cluster.client_id, 0);
        assert!(config.cluster.shard_count.is_none());
        assert!(config.cluster.servers.is_empty());
        assert_eq!(config.rpc.call_timeout(), Duration::from_secs(5));
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = ClientConfig::load(Some("/nonexistent/graphps.toml")).unwrap();
        assert_eq!(config.rpc.connect_timeout_ms, 1_000);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
[cluster]
shard_count = 1000
servers = ["10.0.0.1:8500", "10.0.0.2:8500"]

[rpc]
call_timeout_ms = 250
"#;
        let config = ClientConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.cluster.shard_count, Some(1000));
        assert_eq!(config.cluster.servers.len(), 2);
        assert_eq!(config.rpc.call_timeout(), Duration::from_millis(250));
        // Unspecified fields keep their defaults.
        assert_eq!(config.rpc.connect_timeout_ms, 1_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_error() {
        let err = ClientConfig::from_toml("[rpc]\ncall_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = ClientConfig::default();
        config.cluster.client_id = 7;
        config.cluster.shard_count = Some(64);
        config.logging.json = true;

        let toml_str = config.to_toml().unwrap();
        assert!(toml_str.contains("[cluster]"));
        assert_eq!(ClientConfig::from_toml(&toml_str).unwrap(), config);
    }

    #[test]
    fn test_json_shape() {
        let config = ClientConfig::default();
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["rpc"]["call_timeout_ms"], 5_000);
        assert!(value["cluster"]["shard_count"].is_null());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("GRAPHPS__CLUSTER__SHARD_COUNT", "128"),
            ("GRAPHPS__CLUSTER__SERVERS", "a:1, b:2,"),
            ("GRAPHPS__RPC__CALL_TIMEOUT_MS", "not-a-number"),
            ("GRAPHPS__RPC__CONNECT_TIMEOUT_MS", "250"),
            ("GRAPHPS__LOGGING__JSON", "1"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.cluster.shard_count, Some(128));
        assert_eq!(config.cluster.servers, vec!["a:1".to_string(), "b:2".to_string()]);
        assert_eq!(config.rpc.call_timeout_ms, 5_000);
        assert_eq!(config.rpc.connect_timeout_ms, 250);
        assert!(config.logging.json);
    }

    #[test]
    fn test_zero_timeout_is_clamped() {
        let rpc = RpcConfig {
            call_timeout_ms: 0,
            connect_timeout_ms: 0,
        };
        assert_eq!(rpc.call_timeout(), Duration::from_millis(1));
    }

    #[test]
    fn test_error_display() {
        let err = ConfigError::ServerOutOfRange {
            server: 4,
            server_count: 2,
        };
        assert!(err.to_string().contains("out of range"));
    }
}
