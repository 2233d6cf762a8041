//! Configuration management for patchbay
//!
//! This module provides:
//! - `QueueConfig` for mailbox capacity, drain window and slow-op reporting
//! - `LogConfig` for the binary's default log filter
//! - TOML load/save of the complete `PatchbayConfig`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings of a graph mutation queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Mailbox capacity (0 = use the default)
    pub capacity: usize,

    /// Window in which ops still buffered at shutdown are applied
    pub drain_timeout_ms: u64,

    /// Ops running longer than this are reported
    pub slow_op_threshold_ms: u64,
}

impl QueueConfig {
    pub const DEFAULT_CAPACITY: usize = 32;
    pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 10;
    pub const DEFAULT_SLOW_OP_THRESHOLD_MS: u64 = 300;

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Capacity with the zero value replaced by the default
    pub fn effective_capacity(&self) -> usize {
        if self.capacity == 0 {
            Self::DEFAULT_CAPACITY
        } else {
            self.capacity
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn slow_op_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_op_threshold_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.drain_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "drain_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.slow_op_threshold_ms == 0 {
            return Err(ConfigError::Invalid(
                "slow_op_threshold_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: Self::DEFAULT_CAPACITY,
            drain_timeout_ms: Self::DEFAULT_DRAIN_TIMEOUT_MS,
            slow_op_threshold_ms: Self::DEFAULT_SLOW_OP_THRESHOLD_MS,
        }
    }
}

/// Logging defaults, overridden by `RUST_LOG`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Complete patchbay configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchbayConfig {
    pub queue: QueueConfig,
    pub log: LogConfig,
}

impl PatchbayConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.queue.validate()?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Default location of the config file
    ///
    /// Returns `~/.config/patchbay/config.toml` on Linux,
    /// the platform equivalent elsewhere.
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("patchbay").join("config.toml"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }
}
