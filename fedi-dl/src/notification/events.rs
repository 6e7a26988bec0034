//! Notification events.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events published to observers of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Persistent progress label changed.
    Progress {
        label: String,
        timestamp: DateTime<Utc>,
    },
    /// The run produced its output file.
    Succeeded {
        output_path: PathBuf,
        timestamp: DateTime<Utc>,
    },
    /// The run ended in failure.
    Failed {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn progress(label: impl Into<String>) -> Self {
        Self::Progress {
            label: label.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn succeeded(output_path: impl Into<PathBuf>) -> Self {
        Self::Succeeded {
            output_path: output_path.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
        }
    }

    /// Whether this event ends a run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Progress { timestamp, .. }
            | Self::Succeeded { timestamp, .. }
            | Self::Failed { timestamp, .. } => *timestamp,
        }
    }
}
