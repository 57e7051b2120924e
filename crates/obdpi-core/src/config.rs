//! Logger configuration
//!
//! A JSON document; every field has a default so a partial (or missing)
//! file is valid.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::acquisition::AcquisitionConfig;
use crate::analytics::SummaryOptions;
use crate::protocol::AdapterSettings;
use crate::store::DEFAULT_CAPACITY;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// Config file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The file is not a valid config document
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        /// Config file
        path: PathBuf,
        /// Decoder error
        #[source]
        source: serde_json::Error,
    },

    /// A value the loop cannot run with
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Acquisition loop timing and fallback policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Tick period
    pub tick_ms: u64,
    /// Consecutive transport failures before a reconnect
    pub failure_threshold: u32,
    /// Pause before reconnecting
    pub reconnect_backoff_ms: u64,
    /// Fall back to simulated readings
    pub simulate_on_failure: bool,
    /// Never open the adapter
    pub force_simulation: bool,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        let defaults = AcquisitionConfig::default();
        Self {
            tick_ms: defaults.tick.as_millis() as u64,
            failure_threshold: defaults.failure_threshold,
            reconnect_backoff_ms: defaults.reconnect_backoff.as_millis() as u64,
            simulate_on_failure: defaults.simulate_on_failure,
            force_simulation: defaults.force_simulation,
        }
    }
}

impl AcquisitionSettings {
    /// Settings for [`Acquisition`](crate::acquisition::Acquisition)
    pub fn to_config(&self) -> AcquisitionConfig {
        AcquisitionConfig {
            tick: Duration::from_millis(self.tick_ms),
            failure_threshold: self.failure_threshold,
            reconnect_backoff: Duration::from_millis(self.reconnect_backoff_ms),
            simulate_on_failure: self.simulate_on_failure,
            force_simulation: self.force_simulation,
        }
    }
}

/// Where readings are kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// JSON-lines reading file
    pub path: PathBuf,
    /// Readings kept in memory by in-process consumers
    pub memory_capacity: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: default_data_dir().join("readings.jsonl"),
            memory_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl StorageSettings {
    /// Persisted trip state, next to the reading file
    pub fn trip_path(&self) -> PathBuf {
        self.path.with_file_name("trip.json")
    }
}

/// Default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("obdpi")
}

/// Default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("obdpi")
        .join("config.json")
}

/// Complete logger configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Adapter location and timeouts
    pub adapter: AdapterSettings,
    /// Loop timing and fallback
    pub acquisition: AcquisitionSettings,
    /// Reading file
    pub storage: StorageSettings,
    /// Trip summary settings
    pub analytics: SummaryOptions,
}

impl LoggerConfig {
    /// Load and validate a config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: LoggerConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let io_err = |source: io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, content).map_err(io_err)
    }

    /// Reject values the loop cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.acquisition.tick_ms == 0 {
            return Err(ConfigError::Invalid("acquisition.tick_ms must be > 0".into()));
        }
        if self.acquisition.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "acquisition.failure_threshold must be > 0".into(),
            ));
        }
        if self.adapter.timeout_ms == 0 {
            return Err(ConfigError::Invalid("adapter.timeout_ms must be > 0".into()));
        }
        let interval = self.analytics.sample_interval_secs;
        if !interval.is_finite() || interval <= 0.0 {
            return Err(ConfigError::Invalid(
                "analytics.sample_interval_secs must be positive".into(),
            ));
        }
        if self.storage.memory_capacity == 0 {
            return Err(ConfigError::Invalid("storage.memory_capacity must be > 0".into()));
        }
        Ok(())
    }
}
