//! Pipeline mode, phases and per-run state.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::DownloadRequest;
use crate::downloader::TransferHandle;
use crate::error::PipelineError;
use crate::storage::StorageManager;
use crate::{Error, Result};

/// Which elementary streams a run fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Video and audio, merged by the multiplexer.
    Mux,
    VideoOnly,
    AudioOnly,
}

impl Mode {
    /// Mode implied by the request's selection; `None` if nothing is selected.
    pub fn for_request(request: &DownloadRequest) -> Option<Self> {
        match (&request.video_stream, &request.audio_stream) {
            (Some(_), Some(_)) => Some(Self::Mux),
            (Some(_), None) => Some(Self::VideoOnly),
            (None, Some(_)) => Some(Self::AudioOnly),
            (None, None) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mux => "mux",
            Self::VideoOnly => "video_only",
            Self::AudioOnly => "audio_only",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of a pipeline run. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Init,
    DownloadingVideo,
    /// Second transfer of a multiplexed run.
    DownloadingAudio,
    DownloadingAudioOnly,
    Muxing,
    Succeeded,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::DownloadingVideo => "DOWNLOADING_VIDEO",
            Self::DownloadingAudio => "DOWNLOADING_AUDIO",
            Self::DownloadingAudioOnly => "DOWNLOADING_AUDIO_ONLY",
            Self::Muxing => "MUXING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition for a run in `mode`.
    pub fn can_transition_to(&self, next: Phase, mode: Mode) -> bool {
        use Phase::*;

        match (*self, next) {
            (from, Failed) => !from.is_terminal(),
            (Init, DownloadingVideo) => mode != Mode::AudioOnly,
            (Init, DownloadingAudioOnly) => mode == Mode::AudioOnly,
            (DownloadingVideo, DownloadingAudio) => mode == Mode::Mux,
            (DownloadingVideo, Succeeded) => mode == Mode::VideoOnly,
            (DownloadingAudio, Muxing) => mode == Mode::Mux,
            (DownloadingAudioOnly, Succeeded) => mode == Mode::AudioOnly,
            (Muxing, Succeeded) => mode == Mode::Mux,
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state of one pipeline run, owned by the controller task.
#[derive(Debug, Clone)]
pub struct PipelineState {
    request: DownloadRequest,
    mode: Mode,
    phase: Phase,
    history: Vec<Phase>,
    video_transfer: Option<TransferHandle>,
    audio_transfer: Option<TransferHandle>,
    temp_video_path: Option<PathBuf>,
    temp_audio_path: Option<PathBuf>,
    final_output_path: PathBuf,
}

impl PipelineState {
    /// Validate the request and resolve every path the run will use.
    ///
    /// Temporary paths are assigned only in [`Mode::Mux`].
    pub fn new(
        request: DownloadRequest,
        storage: &StorageManager,
    ) -> std::result::Result<Self, PipelineError> {
        request.validate()?;
        let mode = Mode::for_request(&request)
            .ok_or_else(|| PipelineError::invalid_request("no stream selected"))?;

        let stem = request.file_stem();
        let final_output_path = storage.final_output_path(&stem, &request.extension());
        let (temp_video_path, temp_audio_path) = match mode {
            Mode::Mux => (
                Some(storage.temp_video_path(&stem)),
                Some(storage.temp_audio_path(&stem)),
            ),
            Mode::VideoOnly | Mode::AudioOnly => (None, None),
        };

        Ok(Self {
            request,
            mode,
            phase: Phase::Init,
            history: vec![Phase::Init],
            video_transfer: None,
            audio_transfer: None,
            temp_video_path,
            temp_audio_path,
            final_output_path,
        })
    }

    pub fn request(&self) -> &DownloadRequest {
        &self.request
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Every phase entered so far, starting with `Init`.
    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    pub fn video_transfer(&self) -> Option<TransferHandle> {
        self.video_transfer
    }

    pub fn audio_transfer(&self) -> Option<TransferHandle> {
        self.audio_transfer
    }

    pub fn temp_video_path(&self) -> Option<&Path> {
        self.temp_video_path.as_deref()
    }

    pub fn temp_audio_path(&self) -> Option<&Path> {
        self.temp_audio_path.as_deref()
    }

    pub fn final_output_path(&self) -> &Path {
        &self.final_output_path
    }

    pub fn set_video_transfer(&mut self, handle: TransferHandle) {
        self.video_transfer = Some(handle);
    }

    pub fn set_audio_transfer(&mut self, handle: TransferHandle) {
        self.audio_transfer = Some(handle);
    }

    /// Move to `next`, rejecting backward, skipped or post-terminal transitions.
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_transition_to(next, self.mode) {
            return Err(Error::invalid_transition(self.phase, next));
        }
        self.phase = next;
        self.history.push(next);
        Ok(())
    }
}
