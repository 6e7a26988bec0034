use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Stage of a pipeline run a progress update belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    Video,
    Audio,
    Muxing,
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Video => "Downloading video",
            Self::Audio => "Downloading audio",
            Self::Muxing => "Muxing",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_done: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_time_secs: Option<f64>,
}

impl ProgressSnapshot {
    /// Snapshot for a transfer; the percentage is known only with a total size.
    pub fn from_bytes(bytes_done: u64, bytes_total: Option<u64>) -> Self {
        let percent = bytes_total
            .filter(|total| *total > 0)
            .map(|total| (bytes_done as f64 / total as f64 * 100.0).min(100.0) as f32);
        Self {
            percent,
            bytes_done: Some(bytes_done),
            bytes_total,
            out_time_secs: None,
        }
    }

    /// Snapshot for the multiplexer, estimated against the video duration.
    pub fn from_out_time(out_time_secs: f64, duration_secs: u64) -> Self {
        let percent = (duration_secs > 0)
            .then(|| (out_time_secs / duration_secs as f64 * 100.0).clamp(0.0, 100.0) as f32);
        Self {
            percent,
            bytes_done: None,
            bytes_total: None,
            out_time_secs: Some(out_time_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub stage: ProgressStage,
    /// Stream description, e.g. "720p mp4".
    pub detail: Option<String>,
    /// `None` marks the start of the stage.
    pub snapshot: Option<ProgressSnapshot>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressUpdate {
    /// Label handed to the notifier, e.g. "Downloading video (720p mp4) 42%".
    pub fn label(&self) -> String {
        let mut label = self.stage.to_string();
        if let Some(detail) = &self.detail {
            label.push_str(&format!(" ({detail})"));
        }
        if let Some(percent) = self.snapshot.as_ref().and_then(|s| s.percent) {
            label.push_str(&format!(" {percent:.0}%"));
        }
        label
    }
}

/// Per-stage progress sink.
///
/// Incremental updates are dropped when the channel is full; stage starts
/// are always delivered.
#[derive(Clone)]
pub struct ProgressReporter {
    stage: ProgressStage,
    detail: Option<String>,
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressReporter {
    pub fn new(
        stage: ProgressStage,
        detail: Option<String>,
        tx: mpsc::Sender<ProgressUpdate>,
    ) -> Self {
        Self { stage, detail, tx }
    }

    pub fn noop(stage: ProgressStage) -> Self {
        let (tx, _rx) = mpsc::channel::<ProgressUpdate>(1);
        Self::new(stage, None, tx)
    }

    pub fn stage(&self) -> ProgressStage {
        self.stage
    }

    fn update(&self, snapshot: Option<ProgressSnapshot>) -> ProgressUpdate {
        ProgressUpdate {
            stage: self.stage,
            detail: self.detail.clone(),
            snapshot,
            updated_at: Utc::now(),
        }
    }

    pub async fn started(&self) {
        let _ = self.tx.send(self.update(None)).await;
    }

    pub fn report(&self, snapshot: ProgressSnapshot) {
        let _ = self.tx.try_send(self.update(Some(snapshot)));
    }
}
