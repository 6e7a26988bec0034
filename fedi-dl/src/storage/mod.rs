//! Storage manager: owns the temporary working directory and resolves
//! output paths.
//!
//! At most one pipeline run is active at a time, so the temporary directory
//! belongs entirely to the current run and can be purged wholesale.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::Result;
use crate::config::StorageConfig;
use crate::utils::fs;

const VIDEO_SUFFIX: &str = "-video";
const AUDIO_SUFFIX: &str = "-audio";

#[derive(Debug, Clone)]
pub struct StorageManager {
    temp_dir: PathBuf,
    output_dir: PathBuf,
}

impl StorageManager {
    pub fn new(temp_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.temp_dir, &config.output_dir)
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `<output_dir>/<stem><extension>`.
    pub fn final_output_path(&self, file_stem: &str, extension: &str) -> PathBuf {
        self.output_dir.join(format!("{file_stem}{extension}"))
    }

    /// `<temp_dir>/<stem>-video`.
    pub fn temp_video_path(&self, file_stem: &str) -> PathBuf {
        self.temp_dir.join(format!("{file_stem}{VIDEO_SUFFIX}"))
    }

    /// `<temp_dir>/<stem>-audio`.
    pub fn temp_audio_path(&self, file_stem: &str) -> PathBuf {
        self.temp_dir.join(format!("{file_stem}{AUDIO_SUFFIX}"))
    }

    /// Return the temporary directory, empty.
    ///
    /// Leftovers of an earlier run are purged first.
    pub async fn prepare_temp_dir(&self) -> Result<PathBuf> {
        if fs::remove_dir_all_if_exists(&self.temp_dir).await? {
            info!(path = %self.temp_dir.display(), "Purged stale temporary directory");
        }
        fs::ensure_dir_all_with_op("creating temporary directory", &self.temp_dir).await?;
        Ok(self.temp_dir.clone())
    }

    /// Recursively remove the temporary directory.
    ///
    /// Idempotent: removing an absent directory succeeds.
    pub async fn cleanup_temp_dir(&self) -> Result<()> {
        if fs::remove_dir_all_if_exists(&self.temp_dir).await? {
            debug!(path = %self.temp_dir.display(), "Removed temporary directory");
        }
        Ok(())
    }

    /// Create the output directory if needed.
    pub async fn ensure_output_dir(&self) -> Result<()> {
        fs::ensure_dir_all_with_op("creating output directory", &self.output_dir).await
    }
}
