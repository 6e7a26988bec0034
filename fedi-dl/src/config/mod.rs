//! Application configuration.
//!
//! Configuration is resolved in three layers: built-in defaults, an optional
//! JSON file, then `FEDI_DL_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::fs::io_error;
use crate::{Error, Result};

/// Environment variable overriding [`StorageConfig::output_dir`].
pub const ENV_OUTPUT_DIR: &str = "FEDI_DL_OUTPUT_DIR";
/// Environment variable overriding [`StorageConfig::temp_dir`].
pub const ENV_TEMP_DIR: &str = "FEDI_DL_TEMP_DIR";
/// Environment variable overriding [`MuxerConfig::binary_path`].
pub const ENV_FFMPEG: &str = "FEDI_DL_FFMPEG";
/// Environment variable overriding [`LogConfig::log_dir`].
pub const ENV_LOG_DIR: &str = "FEDI_DL_LOG_DIR";

pub const DEFAULT_USER_AGENT: &str = concat!("fedi-dl/", env!("CARGO_PKG_VERSION"));

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub muxer: MuxerConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

/// Where finished and intermediate files go.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory receiving finished downloads.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Scratch directory for elementary streams awaiting multiplexing.
    /// Purged at the start and end of every multiplexed run.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("fedi-dl")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            temp_dir: default_temp_dir(),
        }
    }
}

/// HTTP transfer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Maximum idle time between two body chunks.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Capacity of the shared transfer event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_read_timeout_secs() -> u64 {
    60
}

fn default_event_capacity() -> usize {
    256
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl TransferConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// External multiplexer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuxerConfig {
    /// Path or name of the ffmpeg binary.
    #[serde(default = "default_binary_path")]
    pub binary_path: String,

    /// Extra global arguments placed at the front of the command line.
    #[serde(default)]
    pub input_args: Vec<String>,

    /// Extra arguments placed before the output path.
    #[serde(default)]
    pub output_args: Vec<String>,

    /// Number of stderr lines kept for failure reports.
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
}

fn default_binary_path() -> String {
    "ffmpeg".to_string()
}

fn default_log_tail_lines() -> usize {
    process_utils::DEFAULT_TAIL_LINES
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            binary_path: default_binary_path(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            log_tail_lines: default_log_tail_lines(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory for daily rotated log files. Console only when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Filter directive used when `RUST_LOG` is not set.
    #[serde(default)]
    pub filter: Option<String>,
}

impl AppConfig {
    /// Load configuration from an optional JSON file plus the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| io_error("reading config file", path, e))?;
        let config = serde_json::from_str(&raw)?;
        debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Apply `FEDI_DL_*` overrides using the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = non_empty(ENV_OUTPUT_DIR) {
            self.storage.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty(ENV_TEMP_DIR) {
            self.storage.temp_dir = PathBuf::from(dir);
        }
        if let Some(binary) = non_empty(ENV_FFMPEG) {
            self.muxer.binary_path = binary;
        }
        if let Some(dir) = non_empty(ENV_LOG_DIR) {
            self.logging.log_dir = Some(PathBuf::from(dir));
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.muxer.binary_path.trim().is_empty() {
            return Err(Error::config("muxer.binary_path must not be empty"));
        }
        if self.transfer.event_capacity == 0 {
            return Err(Error::config("transfer.event_capacity must be greater than 0"));
        }
        if self.storage.temp_dir == self.storage.output_dir
            || self.storage.output_dir.starts_with(&self.storage.temp_dir)
        {
            return Err(Error::config(
                "storage.temp_dir must not contain storage.output_dir",
            ));
        }
        Ok(())
    }
}
