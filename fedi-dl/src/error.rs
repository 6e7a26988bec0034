//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::downloader::TransferHandle;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by a pipeline run.
///
/// `AlreadyRunning` and `InvalidRequest` are returned synchronously from
/// `PipelineController::start`; every other variant ends a run in `Failed`
/// and is surfaced once through the notifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("A download pipeline is already running")]
    AlreadyRunning,

    #[error("Invalid download request: {0}")]
    InvalidRequest(String),

    #[error("Transfer of {url} was rejected: {reason}")]
    EnqueueRejected { url: String, reason: String },

    #[error("Transfer {handle} failed: {reason}")]
    TransferFailed {
        handle: TransferHandle,
        reason: String,
    },

    #[error("Multiplexing failed{}: {log_tail}", exit_suffix(.exit_code))]
    MuxFailed {
        exit_code: Option<i32>,
        log_tail: String,
    },

    #[error("Storage error while {op} {}: {reason}", .path.display())]
    Storage {
        op: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("Download pipeline was cancelled")]
    Cancelled,

    #[error("Internal pipeline error: {0}")]
    Internal(String),
}

fn exit_suffix(exit_code: &Option<i32>) -> String {
    exit_code
        .map(|code| format!(" (exit code {code})"))
        .unwrap_or_default()
}

impl PipelineError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn enqueue_rejected(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnqueueRejected {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn transfer_failed(handle: TransferHandle, reason: impl Into<String>) -> Self {
        Self::TransferFailed {
            handle,
            reason: reason.into(),
        }
    }
}

impl From<Error> for PipelineError {
    fn from(err: Error) -> Self {
        match err {
            Error::Pipeline(inner) => inner,
            Error::IoPath { op, path, source } => Self::Storage {
                op,
                path,
                reason: source.to_string(),
            },
            err @ Error::InvalidStateTransition { .. } => Self::Internal(err.to_string()),
            other => Self::Storage {
                op: "accessing",
                path: PathBuf::new(),
                reason: other.to_string(),
            },
        }
    }
}

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error while {op} {}: {source}", .path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
