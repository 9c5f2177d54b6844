//! Configuration module for the status updater
//!
//! Configuration is a single TOML file. Every section is optional and
//! falls back to defaults, so an empty file (or no file at all) yields a
//! working setup rooted in the platform data directory.
//!
//! # Data Location
//!
//! Unless `paths.data_dir` is set, documents live under the
//! platform-appropriate data directory:
//! - **Linux**: `~/.local/share/onionoo-rs/`
//! - **macOS**: `~/Library/Application Support/onionoo-rs/`
//! - **Windows**: `%APPDATA%\onionoo-rs\`
//!
//! # Example
//!
//! ```toml
//! [paths]
//! data_dir = "/srv/onionoo"
//! input_dir = "/srv/onionoo/in"
//!
//! [retention]
//! current_window_hours = 168
//!
//! [workers]
//! history_threads = 4
//!
//! [[history.uptime]]
//! name = "1_week"
//! bucket_secs = 3600
//! horizon_secs = 604800
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{OnionooError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "onionoo-rs";

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "ONIONOO_CONFIG";

/// Default lock marker file name inside the data directory
pub const LOCK_FILE_NAME: &str = "lock";

/// Default age after which a lock marker is considered stale (6 hours)
pub const DEFAULT_LOCK_STALE_SECS: u64 = 6 * 3600;

/// Default window for a node to remain in the current set (one week)
pub const DEFAULT_CURRENT_WINDOW_HOURS: i64 = 7 * 24;

/// Get the default data directory path
pub fn default_data_dir() -> PathBuf {
    dirs_next::data_dir()
        .map(|p| p.join(APP_ID))
        .unwrap_or_else(|| PathBuf::from(APP_ID))
}

// ==================== Sections ====================

/// Filesystem locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSettings {
    /// Root of the status and published document trees
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory the descriptor source reads pre-fetched inputs from
    #[serde(default)]
    pub input_dir: Option<PathBuf>,

    /// Advisory lock marker; defaults to `<data_dir>/lock`
    #[serde(default)]
    pub lock_file: Option<PathBuf>,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            input_dir: None,
            lock_file: None,
        }
    }
}

impl PathSettings {
    pub fn input_dir(&self) -> PathBuf {
        self.input_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("in"))
    }

    pub fn lock_file(&self) -> PathBuf {
        self.lock_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(LOCK_FILE_NAME))
    }
}

/// How long nodes stay in the active set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionSettings {
    #[serde(default = "default_current_window_hours")]
    pub current_window_hours: i64,
}

fn default_current_window_hours() -> i64 {
    DEFAULT_CURRENT_WINDOW_HOURS
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            current_window_hours: DEFAULT_CURRENT_WINDOW_HOURS,
        }
    }
}

impl RetentionSettings {
    pub fn current_window_millis(&self) -> i64 {
        self.current_window_hours * crate::time::ONE_HOUR
    }
}

/// Parallelism of per-node work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_history_threads")]
    pub history_threads: usize,
}

fn default_history_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(8))
        .unwrap_or(1)
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            history_threads: default_history_threads(),
        }
    }
}

/// Advisory lock behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockSettings {
    #[serde(default = "default_stale_secs")]
    pub stale_after_secs: u64,
}

fn default_stale_secs() -> u64 {
    DEFAULT_LOCK_STALE_SECS
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            stale_after_secs: DEFAULT_LOCK_STALE_SECS,
        }
    }
}

/// Log output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// When set, a daily rolling log file is written here as well
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default)]
    pub filter: Option<String>,
}

// ==================== Updater Config ====================

/// Complete updater configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    #[serde(default)]
    pub paths: PathSettings,

    #[serde(default)]
    pub retention: RetentionSettings,

    #[serde(default)]
    pub history: HistorySettings,

    #[serde(default)]
    pub workers: WorkerSettings,

    #[serde(default)]
    pub lock: LockSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl UpdaterConfig {
    /// Parse a config from TOML text and validate it
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| OnionooError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| OnionooError::Config(format!("Failed to read {:?}: {}", path, e)))?;
        Self::from_toml(&content)
    }

    /// Load from the path named by `ONIONOO_CONFIG`, or use defaults
    pub fn load_from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    /// Save the config as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| OnionooError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), content)
            .map_err(|e| OnionooError::Config(format!("Failed to write config: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.retention.current_window_hours <= 0 {
            return Err(OnionooError::Config(
                "retention.current_window_hours must be positive".to_string(),
            ));
        }
        if self.workers.history_threads == 0 {
            return Err(OnionooError::Config(
                "workers.history_threads must be at least 1".to_string(),
            ));
        }
        self.history.validate()
    }

    /// Config rooted at `data_dir`, used by tests and one-off runs
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathSettings {
                data_dir: data_dir.into(),
                ..PathSettings::default()
            },
            ..Self::default()
        }
    }
}
