//! Download request model.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::utils::filename::{normalize_extension, sanitize_file_stem};

/// A single selectable elementary stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRef {
    /// Remote URL of the stream file.
    pub url: String,
    /// Quality label shown to the user (e.g. "720p", "128kbps").
    #[serde(default)]
    pub quality_label: String,
    /// Container format of the remote file (e.g. "mp4", "m4a").
    #[serde(default)]
    pub format: String,
}

impl StreamRef {
    pub fn new(
        url: impl Into<String>,
        quality_label: impl Into<String>,
        format: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            quality_label: quality_label.into(),
            format: format.into(),
        }
    }

    /// Short description used in progress labels.
    pub fn describe(&self) -> String {
        match (self.quality_label.is_empty(), self.format.is_empty()) {
            (false, false) => format!("{} {}", self.quality_label, self.format),
            (false, true) => self.quality_label.clone(),
            (true, false) => self.format.clone(),
            (true, true) => "stream".to_string(),
        }
    }
}

/// The user's selection for one video.
///
/// Built once from the stream selection and never mutated afterwards; the
/// pipeline takes ownership of it when a run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// External video identifier.
    pub video_id: String,
    /// Selected video-only stream, if any.
    #[serde(default)]
    pub video_stream: Option<StreamRef>,
    /// Selected audio-only stream, if any.
    #[serde(default)]
    pub audio_stream: Option<StreamRef>,
    /// Target extension of the output file (e.g. ".mkv").
    pub container_extension: String,
    /// Video duration, used for progress estimation only.
    #[serde(default)]
    pub duration_secs: u64,
}

impl DownloadRequest {
    pub fn new(video_id: impl Into<String>, container_extension: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            video_stream: None,
            audio_stream: None,
            container_extension: container_extension.into(),
            duration_secs: 0,
        }
    }

    /// Select a video stream.
    pub fn with_video(mut self, stream: StreamRef) -> Self {
        self.video_stream = Some(stream);
        self
    }

    /// Select an audio stream.
    pub fn with_audio(mut self, stream: StreamRef) -> Self {
        self.audio_stream = Some(stream);
        self
    }

    /// Set the duration used for progress estimation.
    pub fn with_duration(mut self, secs: u64) -> Self {
        self.duration_secs = secs;
        self
    }

    /// Check the request before it enters the pipeline.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.video_stream.is_none() && self.audio_stream.is_none() {
            return Err(PipelineError::invalid_request(
                "at least one of video or audio stream must be selected",
            ));
        }
        if self.video_id.trim().is_empty() {
            return Err(PipelineError::invalid_request("video id is empty"));
        }
        for (kind, stream) in [("video", &self.video_stream), ("audio", &self.audio_stream)] {
            if let Some(stream) = stream
                && stream.url.trim().is_empty()
            {
                return Err(PipelineError::invalid_request(format!(
                    "{kind} stream has an empty url"
                )));
            }
        }
        if normalize_extension(&self.container_extension).is_none() {
            return Err(PipelineError::invalid_request(format!(
                "invalid container extension {:?}",
                self.container_extension
            )));
        }
        Ok(())
    }

    /// Filesystem-safe stem derived from the video id.
    pub fn file_stem(&self) -> String {
        sanitize_file_stem(self.video_id.trim())
    }

    /// Dot-prefixed, lowercased container extension.
    ///
    /// Falls back to the raw value for requests that were never validated.
    pub fn extension(&self) -> String {
        normalize_extension(&self.container_extension)
            .unwrap_or_else(|| self.container_extension.clone())
    }
}
