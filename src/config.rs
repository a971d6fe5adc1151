//! Configuration management
//!
//! TOML configuration with sensible defaults and environment variable
//! overrides. Durations accept either a bare number of seconds or a string
//! with a unit suffix:
//!
//! ```toml
//! [query]
//! default_step = "5m"
//! max_result_rows = 100000
//!
//! [storage]
//! partition_width = "1d"
//! last_update_ttl = 0
//!
//! [monitoring]
//! log_level = "info"
//! ```

use crate::error::{Error, Result};
use crate::types::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Query defaults and limits
    #[serde(default)]
    pub query: QueryConfig,

    /// In-memory storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Query configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Step of descriptors built from configuration
    #[serde(default = "default_step")]
    pub default_step: Duration,

    /// Heartbeat of descriptors built from configuration; twice the step when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_heartbeat: Option<Duration>,

    /// Largest number of buckets a single query may produce
    #[serde(default = "default_max_result_rows")]
    pub max_result_rows: usize,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Width of one sample partition
    #[serde(default = "default_partition_width")]
    pub partition_width: Duration,

    /// Lifetime of last-update markers (0 = never expire)
    #[serde(default = "default_last_update_ttl")]
    pub last_update_ttl: Duration,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub structured_logging: bool,
}

// Default value functions
fn default_step() -> Duration { Duration::from_secs(300) }
fn default_max_result_rows() -> usize { 100_000 }
fn default_partition_width() -> Duration { Duration::from_days(1) }
fn default_last_update_ttl() -> Duration { Duration::ZERO }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_step: default_step(),
            default_heartbeat: None,
            max_result_rows: default_max_result_rows(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            partition_width: default_partition_width(),
            last_update_ttl: default_last_update_ttl(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: default_log_level(),
            structured_logging: false,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    ///
    /// Unparsable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        // Query
        if let Some(step) = env_parse("TSDB_DEFAULT_STEP") {
            self.query.default_step = step;
        }
        if let Some(heartbeat) = env_parse("TSDB_DEFAULT_HEARTBEAT") {
            self.query.default_heartbeat = Some(heartbeat);
        }
        if let Some(rows) = env_parse("TSDB_MAX_RESULT_ROWS") {
            self.query.max_result_rows = rows;
        }

        // Storage
        if let Some(width) = env_parse("TSDB_PARTITION_WIDTH") {
            self.storage.partition_width = width;
        }
        if let Some(ttl) = env_parse("TSDB_LAST_UPDATE_TTL") {
            self.storage.last_update_ttl = ttl;
        }

        // Monitoring
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.query.default_step.is_positive() {
            return Err(Error::Configuration("Default step must be > 0".to_string()));
        }
        if let Some(heartbeat) = self.query.default_heartbeat {
            if !heartbeat.is_positive() {
                return Err(Error::Configuration(
                    "Default heartbeat must be > 0".to_string(),
                ));
            }
        }
        if self.query.max_result_rows == 0 {
            return Err(Error::Configuration(
                "Max result rows must be > 0".to_string(),
            ));
        }

        if !self.storage.partition_width.is_positive() {
            return Err(Error::Configuration(
                "Partition width must be > 0".to_string(),
            ));
        }
        if self.storage.last_update_ttl < Duration::ZERO {
            return Err(Error::Configuration(
                "Last-update TTL cannot be negative".to_string(),
            ));
        }

        if self.monitoring.log_level.trim().is_empty() {
            return Err(Error::Configuration("Log level cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}
