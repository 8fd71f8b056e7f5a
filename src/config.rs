//! Configuration management for Tokenhive.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TokenHiveError};
use crate::ratelimit::BucketParams;

/// Prefix of environment variables overriding file settings,
/// e.g. `TOKENHIVE__STORE__URL`.
const ENV_PREFIX: &str = "TOKENHIVE";

/// Main configuration for Tokenhive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenHiveConfig {
    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Token bucket configuration
    #[serde(default)]
    pub limiter: LimiterConfig,
}

/// Shared store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL
    #[serde(default = "default_store_url")]
    pub url: String,

    /// How long to wait for the initial connection
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// How long one store round trip may take before it counts as a failure
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_response_timeout_ms() -> u64 {
    1000
}

/// Token bucket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Tokens added per second
    #[serde(default = "default_rate")]
    pub rate: u32,

    /// Maximum tokens held
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Interval between store probes while degraded
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            capacity: default_capacity(),
            probe_interval_ms: default_probe_interval_ms(),
        }
    }
}

impl LimiterConfig {
    /// Validate the bucket settings.
    pub fn bucket_params(&self) -> Result<BucketParams> {
        BucketParams::new(self.rate, self.capacity)
    }

    pub fn probe_interval(&self) -> Result<Duration> {
        if self.probe_interval_ms == 0 {
            return Err(TokenHiveError::Config(
                "probe_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(Duration::from_millis(self.probe_interval_ms))
    }
}

fn default_rate() -> u32 {
    5
}

fn default_capacity() -> u32 {
    10
}

fn default_probe_interval_ms() -> u64 {
    100
}

impl TokenHiveConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TokenHiveError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from an optional YAML file, overridden by
    /// `TOKENHIVE__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(TokenHiveError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("configuration file {} not found", path.display()),
                )));
            }
            builder = builder.add_source(config::File::from(path));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| TokenHiveError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TokenHiveConfig::default();
        assert_eq!(config.store.url, "redis://127.0.0.1:6379");
        assert_eq!(config.store.response_timeout(), Duration::from_secs(1));
        assert_eq!(config.limiter.rate, 5);
        assert_eq!(config.limiter.capacity, 10);
        assert_eq!(config.limiter.probe_interval().unwrap(), Duration::from_millis(100));
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
store:
  url: redis://cache:6380/2
limiter:
  rate: 50
"#;
        let config = TokenHiveConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.store.url, "redis://cache:6380/2");
        assert_eq!(config.store.connect_timeout_ms, 5000);
        assert_eq!(config.limiter.rate, 50);
        assert_eq!(config.limiter.capacity, 10);
    }

    #[test]
    fn test_invalid_bucket_is_config_error() {
        let config = TokenHiveConfig::from_yaml("limiter:\n  rate: 0\n").unwrap();
        assert!(matches!(
            config.limiter.bucket_params(),
            Err(TokenHiveError::Config(_))
        ));
    }

    #[test]
    fn test_zero_probe_interval_is_rejected() {
        let config = TokenHiveConfig::from_yaml("limiter:\n  probe_interval_ms: 0\n").unwrap();
        assert!(config.limiter.probe_interval().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("tokenhive-{}.yaml", std::process::id()));
        std::fs::write(&path, "limiter:\n  capacity: 42\n").unwrap();

        let config = TokenHiveConfig::load(Some(&path)).unwrap();
        assert_eq!(config.limiter.capacity, 42);
        assert_eq!(config.limiter.rate, 5);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let path = Path::new("/nonexistent/tokenhive.yaml");
        assert!(matches!(
            TokenHiveConfig::load(Some(path)),
            Err(TokenHiveError::Io(_))
        ));
    }
}
