//! Configuration management for Sluice.
//!
//! Settings are layered: built-in defaults, an optional YAML file, then
//! environment variables prefixed with `SLUICE_` (nested keys separated by
//! `__`, e.g. `SLUICE_LIMITS__LIMIT=20`). CLI flags are applied on top by the
//! binary.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SluiceError};

/// Main configuration for the Sluice service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SluiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Admission limits shared by both algorithms
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Deadline for a single admission check against the store, in milliseconds
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            store_timeout_ms: default_store_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_store_timeout() -> u64 {
    500
}

/// Which counter store implementation backs the limiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis instance; required when more than one replica runs
    Redis,
    /// Process-local store, only meaningful for a single replica
    Memory,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Redis connection URL; credentials and database index go in the URL
    #[serde(default = "default_store_url")]
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_store_url(),
        }
    }
}

fn default_backend() -> StoreBackend {
    StoreBackend::Redis
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

/// Limits applied by the fixed-bucket and sliding-window limiters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum admitted requests per replenishment cycle or window
    #[serde(default = "default_limit")]
    pub limit: i64,

    /// Sliding window retention in minutes
    #[serde(default = "default_window_minutes")]
    pub window_minutes: i64,

    /// Interval between replenisher ticks, in milliseconds
    #[serde(default = "default_replenish_interval")]
    pub replenish_interval_ms: u64,

    /// Store key holding the capacity counter
    #[serde(default = "default_bucket_key")]
    pub bucket_key: String,

    /// Store key holding the window histogram
    #[serde(default = "default_window_key")]
    pub window_key: String,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            window_minutes: default_window_minutes(),
            replenish_interval_ms: default_replenish_interval(),
            bucket_key: default_bucket_key(),
            window_key: default_window_key(),
        }
    }
}

impl LimitsConfig {
    pub fn replenish_interval(&self) -> Duration {
        Duration::from_millis(self.replenish_interval_ms)
    }
}

fn default_limit() -> i64 {
    10
}

fn default_window_minutes() -> i64 {
    5
}

fn default_replenish_interval() -> u64 {
    1000
}

fn default_bucket_key() -> String {
    "bucket".to_string()
}

fn default_window_key() -> String {
    "window".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG` when set
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl SluiceConfig {
    /// Load configuration from defaults, an optional YAML file and the
    /// process environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Same as [`SluiceConfig::load`], reading environment overrides from
    /// `env` instead of the process environment when given.
    pub fn load_with_env(path: Option<&str>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&SluiceConfig::default())?);

        if let Some(path) = path {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(File::new(path, FileFormat::Yaml));
        }

        builder = builder.add_source(
            Environment::with_prefix("SLUICE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: SluiceConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file only.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SluiceConfig =
            serde_yaml::from_str(yaml).map_err(|e| SluiceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the limiters cannot run with.
    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        if limits.limit <= 0 {
            return Err(SluiceError::Config(format!(
                "limits.limit must be positive, got {}",
                limits.limit
            )));
        }
        if limits.window_minutes <= 0 {
            return Err(SluiceError::Config(format!(
                "limits.window_minutes must be positive, got {}",
                limits.window_minutes
            )));
        }
        if limits.replenish_interval_ms == 0 {
            return Err(SluiceError::Config(
                "limits.replenish_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.server.store_timeout_ms == 0 {
            return Err(SluiceError::Config(
                "server.store_timeout_ms must be non-zero".to_string(),
            ));
        }
        if limits.bucket_key.trim().is_empty() || limits.window_key.trim().is_empty() {
            return Err(SluiceError::Config("store keys must not be blank".to_string()));
        }
        if limits.bucket_key == limits.window_key {
            return Err(SluiceError::Config(
                "limits.bucket_key and limits.window_key must differ".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SluiceConfig::default();
        assert_eq!(config.limits.limit, 10);
        assert_eq!(config.limits.window_minutes, 5);
        assert_eq!(config.limits.replenish_interval(), Duration::from_secs(1));
        assert_eq!(config.server.http_addr.port(), 8080);
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
store:
  backend: memory
limits:
  limit: 3
"#;
        let config = SluiceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.limits.limit, 3);
        assert_eq!(config.limits.window_minutes, 5);
        assert_eq!(config.limits.bucket_key, "bucket");
    }

    #[test]
    fn test_zero_limit_rejected() {
        let yaml = "limits:\n  limit: 0\n";
        let err = SluiceConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, SluiceError::Config(_)));
    }

    #[test]
    fn test_shared_keys_rejected() {
        let mut config = SluiceConfig::default();
        config.limits.window_key = config.limits.bucket_key.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_defaults() {
        let env = HashMap::from([
            ("SLUICE_LIMITS__LIMIT".to_string(), "25".to_string()),
            ("SLUICE_LIMITS__WINDOW_MINUTES".to_string(), "2".to_string()),
            ("SLUICE_STORE__BACKEND".to_string(), "memory".to_string()),
        ]);
        let config = SluiceConfig::load_with_env(None, Some(env)).unwrap();
        assert_eq!(config.limits.limit, 25);
        assert_eq!(config.limits.window_minutes, 2);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.limits.replenish_interval_ms, 1000);
    }
}
