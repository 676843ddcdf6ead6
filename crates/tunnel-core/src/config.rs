//! Configuration file parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the embedded datastore.
pub const DEFAULT_DATASTORE_PATH: &str = "/var/lib/tunnel-ipam/datastore.redb";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Name of the node to reconcile. `NODENAME` takes precedence.
    pub node_name: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub datastore: DatastoreConfig,
}

/// Bounds for the node update loop when the store reports a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between attempts, in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreConfig {
    #[serde(default = "default_datastore_path")]
    pub path: PathBuf,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_datastore_path() -> PathBuf {
    PathBuf::from(DEFAULT_DATASTORE_PATH)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Retry config with no delay between attempts (for testing).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_ms: 0,
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            path: default_datastore_path(),
        }
    }
}

impl TunnelConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TunnelConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if matches!(&self.node_name, Some(name) if name.is_empty()) {
            anyhow::bail!("node_name must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: TunnelConfig = toml::from_str("").unwrap();
        assert_eq!(config.node_name, None);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff(), Duration::from_secs(1));
        assert_eq!(config.datastore.path, PathBuf::from(DEFAULT_DATASTORE_PATH));
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
node_name = "node-7"

[retry]
max_attempts = 3
backoff_ms = 250

[datastore]
path = "/tmp/store.redb"
"#;
        let config: TunnelConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.node_name.as_deref(), Some("node-7"));
        assert_eq!(config.retry, RetryConfig { max_attempts: 3, backoff_ms: 250 });
        assert_eq!(config.datastore.path, PathBuf::from("/tmp/store.redb"));
    }

    #[test]
    fn test_partial_retry_section() {
        let config: TunnelConfig = toml::from_str("[retry]\nbackoff_ms = 10\n").unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_ms, 10);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config: TunnelConfig = toml::from_str("[retry]\nmax_attempts = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_keeps_node_name() {
        let config = TunnelConfig {
            node_name: Some("edge-3".to_string()),
            ..Default::default()
        };
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("edge-3"));
    }
}
