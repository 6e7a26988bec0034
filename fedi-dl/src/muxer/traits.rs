//! Multiplexer trait and related types.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::pipeline::ProgressReporter;

/// Inputs of one multiplexer invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxJob {
    /// Downloaded video-only file.
    pub video_path: PathBuf,
    /// Downloaded audio-only file.
    pub audio_path: PathBuf,
    /// Final container path; its extension selects the container.
    pub output_path: PathBuf,
    /// Used to turn processed media time into a percentage.
    pub duration_secs: u64,
}

impl MuxJob {
    pub fn new(
        video_path: impl Into<PathBuf>,
        audio_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            video_path: video_path.into(),
            audio_path: audio_path.into(),
            output_path: output_path.into(),
            duration_secs: 0,
        }
    }

    pub fn with_duration(mut self, secs: u64) -> Self {
        self.duration_secs = secs;
        self
    }

    /// First input that does not exist on disk, if any.
    pub async fn missing_input(&self) -> Option<&Path> {
        for path in [self.video_path.as_path(), self.audio_path.as_path()] {
            let is_file = tokio::fs::metadata(path)
                .await
                .is_ok_and(|metadata| metadata.is_file());
            if !is_file {
                return Some(path);
            }
        }
        None
    }
}

/// Result of a multiplexer process that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxOutcome {
    pub exit_code: i32,
    /// Last lines of diagnostic output.
    pub log_tail: String,
}

impl MuxOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Map a non-zero exit into [`PipelineError::MuxFailed`].
    pub fn into_result(self) -> Result<(), PipelineError> {
        if self.success() {
            Ok(())
        } else {
            Err(PipelineError::MuxFailed {
                exit_code: Some(self.exit_code),
                log_tail: self.log_tail,
            })
        }
    }
}

/// Merges one video and one audio file into a single container.
#[async_trait]
pub trait Muxer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Run the multiplexer once.
    ///
    /// The output path is written only when the process exits with `0`.
    /// A process that could not be launched yields
    /// `Err(PipelineError::MuxFailed { exit_code: None, .. })`; a process that
    /// ran yields `Ok` with its exit code, whatever it was. Firing `cancel`
    /// stops the process and yields `Err(PipelineError::Cancelled)`.
    async fn mux(
        &self,
        job: &MuxJob,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<MuxOutcome, PipelineError>;
}
