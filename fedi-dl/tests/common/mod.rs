//! Shared test doubles for pipeline integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::{Notify, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use fedi_dl::PipelineError;
use fedi_dl::domain::{DownloadRequest, StreamRef};
use fedi_dl::downloader::{TransferCompletion, TransferEvent, TransferHandle, TransferManager};
use fedi_dl::muxer::{MuxJob, MuxOutcome, Muxer};
use fedi_dl::notification::Notifier;
use fedi_dl::pipeline::{PipelineController, ProgressReporter};
use fedi_dl::storage::StorageManager;

pub const VIDEO_URL: &str = "https://peertube.example/static/720.mp4";
pub const AUDIO_URL: &str = "https://peertube.example/static/128.m4a";

/// Fail the test instead of hanging forever.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

pub fn video_stream() -> StreamRef {
    StreamRef::new(VIDEO_URL, "720p", "mp4")
}

pub fn audio_stream() -> StreamRef {
    StreamRef::new(AUDIO_URL, "128kbps", "m4a")
}

pub fn mux_request(id: &str) -> DownloadRequest {
    DownloadRequest::new(id, ".mkv")
        .with_video(video_stream())
        .with_audio(audio_stream())
        .with_duration(120)
}

/// A transfer observed by [`ScriptedTransferManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    pub handle: TransferHandle,
    pub url: String,
    pub destination: PathBuf,
}

/// Transfer manager whose completions are driven by the test.
pub struct ScriptedTransferManager {
    event_tx: broadcast::Sender<TransferEvent>,
    enqueued_tx: mpsc::UnboundedSender<Enqueued>,
    enqueued_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Enqueued>>,
    history: Mutex<Vec<Enqueued>>,
    destinations: Mutex<HashMap<TransferHandle, PathBuf>>,
    cancelled: Mutex<Vec<TransferHandle>>,
    reject_url: Mutex<Option<String>>,
    auto_complete: bool,
}

impl ScriptedTransferManager {
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Every transfer succeeds as soon as it is enqueued.
    pub fn auto_complete() -> Self {
        Self::build(true)
    }

    fn build(auto_complete: bool) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        let (enqueued_tx, enqueued_rx) = mpsc::unbounded_channel();
        Self {
            event_tx,
            enqueued_tx,
            enqueued_rx: tokio::sync::Mutex::new(enqueued_rx),
            history: Mutex::new(Vec::new()),
            destinations: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(Vec::new()),
            reject_url: Mutex::new(None),
            auto_complete,
        }
    }

    /// Reject enqueue calls for `url`.
    pub fn reject(&self, url: &str) {
        *self.reject_url.lock() = Some(url.to_string());
    }

    /// Wait for the next enqueue call.
    pub async fn next_enqueued(&self) -> Enqueued {
        within(self.enqueued_rx.lock().await.recv())
            .await
            .expect("transfer manager dropped")
    }

    pub fn enqueued(&self) -> Vec<Enqueued> {
        self.history.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<TransferHandle> {
        self.cancelled.lock().clone()
    }

    /// Publish an arbitrary event on the shared stream.
    pub fn emit(&self, event: TransferEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn progress(&self, handle: TransferHandle, bytes_done: u64, bytes_total: u64) {
        self.emit(TransferEvent::Progress {
            handle,
            bytes_done,
            bytes_total: Some(bytes_total),
        });
    }

    /// Finish `handle`. A successful transfer leaves a file at its destination.
    pub fn complete(&self, handle: TransferHandle, succeeded: bool) {
        let destination = self.destinations.lock().get(&handle).cloned();
        let completion = if succeeded {
            if let Some(destination) = destination {
                std::fs::write(&destination, b"stream bytes").expect("write destination");
            }
            TransferCompletion::success(handle)
        } else {
            TransferCompletion::failure(handle, "HTTP 404 Not Found")
        };
        self.emit(TransferEvent::Finished(completion));
    }
}

impl TransferManager for ScriptedTransferManager {
    fn enqueue(&self, url: &str, destination: &Path) -> Result<TransferHandle, PipelineError> {
        if self.reject_url.lock().as_deref() == Some(url) {
            return Err(PipelineError::enqueue_rejected(url, "download service unavailable"));
        }

        let handle = TransferHandle::next();
        let enqueued = Enqueued {
            handle,
            url: url.to_string(),
            destination: destination.to_path_buf(),
        };
        self.destinations
            .lock()
            .insert(handle, destination.to_path_buf());
        self.history.lock().push(enqueued.clone());
        let _ = self.enqueued_tx.send(enqueued);

        if self.auto_complete {
            self.complete(handle, true);
        }
        Ok(handle)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.event_tx.subscribe()
    }

    fn cancel(&self, handle: TransferHandle) -> bool {
        self.cancelled.lock().push(handle);
        true
    }
}

/// Observations recorded by [`RecordingMuxer`] for each call.
#[derive(Debug, Clone)]
pub struct MuxCall {
    pub job: MuxJob,
    pub video_existed: bool,
    pub audio_existed: bool,
}

/// Multiplexer double with a configurable exit code.
pub struct RecordingMuxer {
    exit_code: i32,
    gate: Option<Arc<Notify>>,
    panics: bool,
    calls: Mutex<Vec<MuxCall>>,
}

impl RecordingMuxer {
    pub fn exiting_with(exit_code: i32) -> Self {
        Self {
            exit_code,
            gate: None,
            panics: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Panic inside `mux` after recording the call.
    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::exiting_with(0)
        }
    }

    /// Block inside `mux` until `gate` is notified or the run is cancelled.
    pub fn gated(exit_code: i32, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::exiting_with(exit_code)
        }
    }

    pub fn calls(&self) -> Vec<MuxCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Muxer for RecordingMuxer {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn mux(
        &self,
        job: &MuxJob,
        _progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<MuxOutcome, PipelineError> {
        self.calls.lock().push(MuxCall {
            job: job.clone(),
            video_existed: job.video_path.is_file(),
            audio_existed: job.audio_path.is_file(),
        });

        if self.panics {
            panic!("muxer crashed");
        }

        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = gate.notified() => {}
            }
        }

        if self.exit_code == 0 {
            std::fs::write(&job.output_path, b"muxed").expect("write output");
        }
        Ok(MuxOutcome {
            exit_code: self.exit_code,
            log_tail: format!("{}: Invalid data found when processing input", job.audio_path.display()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Progress(String),
    Success(PathBuf),
    Failure(String),
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().clone()
    }

    pub fn progress_labels(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Progress(label) => Some(label),
                _ => None,
            })
            .collect()
    }

    pub fn successes(&self) -> Vec<PathBuf> {
        self.events()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Success(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Failure(reason) => Some(reason),
                _ => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn show_progress(&self, label: &str) {
        self.events
            .lock()
            .push(Notification::Progress(label.to_string()));
    }

    fn report_success(&self, output_path: &Path) {
        self.events
            .lock()
            .push(Notification::Success(output_path.to_path_buf()));
    }

    fn report_failure(&self, reason: &str) {
        self.events
            .lock()
            .push(Notification::Failure(reason.to_string()));
    }
}

/// A controller wired to test doubles inside a temporary directory.
pub struct Harness {
    pub root: TempDir,
    pub transfers: Arc<ScriptedTransferManager>,
    pub muxer: Arc<RecordingMuxer>,
    pub notifier: Arc<RecordingNotifier>,
    pub controller: PipelineController,
}

impl Harness {
    pub fn new(transfers: ScriptedTransferManager, muxer: RecordingMuxer) -> Self {
        let root = TempDir::new().expect("temp dir");
        let transfers = Arc::new(transfers);
        let muxer = Arc::new(muxer);
        let notifier = Arc::new(RecordingNotifier::default());
        let storage = StorageManager::new(root.path().join("tmp"), root.path().join("out"));
        let controller = PipelineController::new(
            transfers.clone(),
            muxer.clone(),
            notifier.clone(),
            storage,
        );
        Self {
            root,
            transfers,
            muxer,
            notifier,
            controller,
        }
    }

    /// Scripted transfers and a muxer that exits with `0`.
    pub fn scripted() -> Self {
        Self::new(ScriptedTransferManager::new(), RecordingMuxer::exiting_with(0))
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.path().join("tmp")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.path().join("out")
    }
}
