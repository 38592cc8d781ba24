// ABOUTME: Configuration loading for the persistence service.
// ABOUTME: Reads the base directory, write durability and rate-limit threshold from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::rate_limit::DEFAULT_MIN_WRITE_INTERVAL;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a boolean: {value:?}")]
    InvalidBool { var: &'static str, value: String },

    #[error("STRONGBOX_MIN_WRITE_INTERVAL_MS is not a number of milliseconds: {0:?}")]
    InvalidInterval(String),
}

/// Persistence configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrongboxConfig {
    /// Application base directory; store files live under `<base_dir>/db/`.
    pub base_dir: PathBuf,
    pub sync_writes: bool,
    pub min_write_interval: Duration,
}

impl StrongboxConfig {
    /// Defaults rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            sync_writes: true,
            min_write_interval: DEFAULT_MIN_WRITE_INTERVAL,
        }
    }

    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - STRONGBOX_HOME: base directory (default: ~/.strongbox)
    /// - STRONGBOX_SYNC_WRITES: fsync before committing a store file (default: true)
    /// - STRONGBOX_MIN_WRITE_INTERVAL_MS: rate-limited client threshold (default: 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_dir = std::env::var("STRONGBOX_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("/tmp"))
                    .join(".strongbox")
            });

        let sync_writes = match std::env::var("STRONGBOX_SYNC_WRITES") {
            Ok(value) => parse_bool("STRONGBOX_SYNC_WRITES", &value)?,
            Err(_) => true,
        };

        let min_write_interval = match std::env::var("STRONGBOX_MIN_WRITE_INTERVAL_MS") {
            Ok(value) => value
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidInterval(value))?,
            Err(_) => DEFAULT_MIN_WRITE_INTERVAL,
        };

        Ok(Self {
            base_dir,
            sync_writes,
            min_write_interval,
        })
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            var,
            value: value.to_string(),
        }),
    }
}
