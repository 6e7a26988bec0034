//! Transfer manager trait and related types.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::PipelineError;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier of one enqueued transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferHandle(u64);

impl TransferHandle {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocate a process-wide unique handle. Handles are never reused.
    pub fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Final outcome of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCompletion {
    pub handle: TransferHandle,
    pub succeeded: bool,
    /// Failure detail, if the platform provided one.
    pub reason: Option<String>,
}

impl TransferCompletion {
    pub fn success(handle: TransferHandle) -> Self {
        Self {
            handle,
            succeeded: true,
            reason: None,
        }
    }

    pub fn failure(handle: TransferHandle, reason: impl Into<String>) -> Self {
        Self {
            handle,
            succeeded: false,
            reason: Some(reason.into()),
        }
    }
}

/// Events published on the shared transfer event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// Bytes received so far.
    Progress {
        handle: TransferHandle,
        bytes_done: u64,
        bytes_total: Option<u64>,
    },
    /// Exactly one per enqueued transfer.
    Finished(TransferCompletion),
}

impl TransferEvent {
    pub fn handle(&self) -> TransferHandle {
        match self {
            Self::Progress { handle, .. } => *handle,
            Self::Finished(completion) => completion.handle,
        }
    }
}

/// Adapter over a download facility.
///
/// `enqueue` hands the transfer off and returns immediately. Completion is
/// published out-of-band on the stream returned by `subscribe`, shared by
/// every transfer the manager runs; consumers correlate by handle.
pub trait TransferManager: Send + Sync {
    /// Start fetching `url` into `destination`.
    ///
    /// Fails with [`PipelineError::EnqueueRejected`] if the transfer cannot
    /// be accepted.
    fn enqueue(&self, url: &str, destination: &Path) -> Result<TransferHandle, PipelineError>;

    /// Subscribe to the shared event stream. Events published before the
    /// call are not replayed.
    fn subscribe(&self) -> broadcast::Receiver<TransferEvent>;

    /// Best-effort cancellation. Returns `true` if the transfer was active.
    fn cancel(&self, _handle: TransferHandle) -> bool {
        false
    }
}
