//! Pipeline controller.
//!
//! Drives one download run at a time through its phases:
//!
//! ```text
//! Mux:       INIT -> DOWNLOADING_VIDEO -> DOWNLOADING_AUDIO -> MUXING -> SUCCEEDED
//! VideoOnly: INIT -> DOWNLOADING_VIDEO -> SUCCEEDED
//! AudioOnly: INIT -> DOWNLOADING_AUDIO_ONLY -> SUCCEEDED
//! ```
//!
//! Any non-terminal phase may move to `FAILED`. A multiplexed run removes
//! the temporary directory on every terminal transition, and the notifier
//! receives exactly one terminal notification per run.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::guard::{RunGuard, RunPermit};
use super::progress::{ProgressReporter, ProgressSnapshot, ProgressStage, ProgressUpdate};
use super::state::{Mode, Phase, PipelineState};
use crate::domain::{DownloadRequest, StreamRef};
use crate::downloader::{CompletionWaiter, TransferHandle, TransferManager};
use crate::error::PipelineError;
use crate::muxer::{MuxJob, Muxer};
use crate::notification::Notifier;
use crate::storage::StorageManager;

/// Buffered progress updates between the run and the notifier.
const PROGRESS_CAPACITY: usize = 32;

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub video_id: String,
    pub mode: Mode,
    /// Every phase the run entered, in order.
    pub phases: Vec<Phase>,
    /// Final output path on success.
    pub result: Result<PathBuf, PipelineError>,
}

impl PipelineReport {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn final_phase(&self) -> Phase {
        self.phases.last().copied().unwrap_or(Phase::Init)
    }
}

/// Handle to a started run.
///
/// Dropping it detaches the run; it keeps going in the background.
#[derive(Debug)]
pub struct PipelineRun {
    id: Uuid,
    video_id: String,
    mode: Mode,
    phase: watch::Receiver<Phase>,
    cancel: CancellationToken,
    task: JoinHandle<PipelineReport>,
}

impl PipelineRun {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Receiver that observes every phase change.
    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }

    /// Request cancellation; the run ends in `FAILED` with
    /// [`PipelineError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to reach a terminal phase.
    pub async fn wait(self) -> PipelineReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                error!(run_id = %self.id, "Pipeline task aborted: {}", e);
                PipelineReport {
                    run_id: self.id,
                    video_id: self.video_id,
                    mode: self.mode,
                    phases: vec![Phase::Failed],
                    result: Err(PipelineError::Internal(format!("pipeline task aborted: {e}"))),
                }
            }
        }
    }
}

struct ActiveRun {
    id: Uuid,
    cancel: CancellationToken,
}

/// Owns the collaborators of the pipeline and starts runs.
pub struct PipelineController {
    transfers: Arc<dyn TransferManager>,
    muxer: Arc<dyn Muxer>,
    notifier: Arc<dyn Notifier>,
    storage: Arc<StorageManager>,
    guard: RunGuard,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

impl PipelineController {
    pub fn new(
        transfers: Arc<dyn TransferManager>,
        muxer: Arc<dyn Muxer>,
        notifier: Arc<dyn Notifier>,
        storage: StorageManager,
    ) -> Self {
        Self {
            transfers,
            muxer,
            notifier,
            storage: Arc::new(storage),
            guard: RunGuard::new(),
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    /// Whether a run currently holds the single-run guard.
    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    /// Cancel the active run, if any. Returns whether a run was signalled.
    pub fn cancel(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(run) => {
                info!(run_id = %run.id, "Cancelling pipeline run");
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Start a run for `request`.
    ///
    /// Fails synchronously with [`PipelineError::InvalidRequest`] for a
    /// malformed request and with [`PipelineError::AlreadyRunning`] while
    /// another run is active. Every later failure is reported through the
    /// notifier and the returned run's report.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn start(&self, request: DownloadRequest) -> Result<PipelineRun, PipelineError> {
        request.validate()?;

        let Some(permit) = self.guard.try_acquire() else {
            warn!(video_id = %request.video_id, "Rejecting start: a pipeline is already running");
            return Err(PipelineError::AlreadyRunning);
        };

        let state = PipelineState::new(request, &self.storage)?;
        // Subscribe before any transfer is enqueued.
        let waiter = CompletionWaiter::new(self.transfers.subscribe());

        let id = Uuid::new_v4();
        let video_id = state.request().video_id.clone();
        let mode = state.mode();
        let cancel = CancellationToken::new();
        let (phase_tx, phase_rx) = watch::channel(Phase::Init);

        *self.active.lock() = Some(ActiveRun {
            id,
            cancel: cancel.clone(),
        });

        info!(
            run_id = %id,
            video_id = %video_id,
            mode = %mode,
            output = %state.final_output_path().display(),
            "Starting download pipeline"
        );

        let runner = PipelineRunner {
            id,
            transfers: Arc::clone(&self.transfers),
            muxer: Arc::clone(&self.muxer),
            notifier: Arc::clone(&self.notifier),
            storage: Arc::clone(&self.storage),
            state,
            waiter,
            phase_tx,
            cancel: cancel.clone(),
        };

        let active = Arc::clone(&self.active);
        let span = info_span!("pipeline", run_id = %id, video_id = %video_id);
        let task = tokio::spawn(
            async move {
                let report = runner.run().await;
                release(&active, id, permit);
                report
            }
            .instrument(span),
        );

        Ok(PipelineRun {
            id,
            video_id,
            mode,
            phase: phase_rx,
            cancel,
            task,
        })
    }
}

fn release(active: &Mutex<Option<ActiveRun>>, id: Uuid, permit: RunPermit) {
    {
        let mut active = active.lock();
        if active.as_ref().is_some_and(|run| run.id == id) {
            *active = None;
        }
    }
    drop(permit);
}

/// Task-side state of one run.
struct PipelineRunner {
    id: Uuid,
    transfers: Arc<dyn TransferManager>,
    muxer: Arc<dyn Muxer>,
    notifier: Arc<dyn Notifier>,
    storage: Arc<StorageManager>,
    state: PipelineState,
    waiter: CompletionWaiter,
    phase_tx: watch::Sender<Phase>,
    cancel: CancellationToken,
}

impl PipelineRunner {
    async fn run(mut self) -> PipelineReport {
        let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_CAPACITY);
        let drain = tokio::spawn(forward_progress(progress_rx, Arc::clone(&self.notifier)));

        let result = match AssertUnwindSafe(self.drive(&progress_tx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(PipelineError::Internal(format!(
                "pipeline task panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        // Flush pending labels before the terminal notification.
        drop(progress_tx);
        if let Err(e) = drain.await {
            warn!("Progress forwarder ended abnormally: {}", e);
        }

        let terminal = if result.is_ok() {
            Phase::Succeeded
        } else {
            Phase::Failed
        };
        if let Err(e) = self.advance(terminal) {
            error!("Could not record terminal phase: {}", e);
        }

        // Single-stream runs never touch the temporary directory.
        if self.state.mode() == Mode::Mux
            && let Err(e) = self.storage.cleanup_temp_dir().await
        {
            warn!("Failed to clean up temporary directory: {}", e);
        }

        match &result {
            Ok(path) => {
                info!(output = %path.display(), "Download pipeline succeeded");
                self.notifier.report_success(path);
            }
            Err(e) => {
                error!("Download pipeline failed: {}", e);
                self.notifier.report_failure(&e.to_string());
            }
        }

        PipelineReport {
            run_id: self.id,
            video_id: self.state.request().video_id.clone(),
            mode: self.state.mode(),
            phases: self.state.history().to_vec(),
            result,
        }
    }

    async fn drive(
        &mut self,
        progress: &mpsc::Sender<ProgressUpdate>,
    ) -> Result<PathBuf, PipelineError> {
        self.storage.ensure_output_dir().await?;
        let output = self.state.final_output_path().to_path_buf();

        match self.state.mode() {
            Mode::Mux => self.drive_mux(progress, output).await,
            Mode::VideoOnly => {
                let stream = self.selected_stream(ProgressStage::Video)?;
                self.advance(Phase::DownloadingVideo)?;
                let handle = self
                    .transfer(&stream, &output, ProgressStage::Video, progress)
                    .await?;
                debug!(handle = %handle, "Video transfer complete");
                Ok(output)
            }
            Mode::AudioOnly => {
                let stream = self.selected_stream(ProgressStage::Audio)?;
                self.advance(Phase::DownloadingAudioOnly)?;
                let handle = self
                    .transfer(&stream, &output, ProgressStage::Audio, progress)
                    .await?;
                debug!(handle = %handle, "Audio transfer complete");
                Ok(output)
            }
        }
    }

    async fn drive_mux(
        &mut self,
        progress: &mpsc::Sender<ProgressUpdate>,
        output: PathBuf,
    ) -> Result<PathBuf, PipelineError> {
        let video = self.selected_stream(ProgressStage::Video)?;
        let audio = self.selected_stream(ProgressStage::Audio)?;
        let (Some(temp_video), Some(temp_audio)) = (
            self.state.temp_video_path().map(Path::to_path_buf),
            self.state.temp_audio_path().map(Path::to_path_buf),
        ) else {
            return Err(PipelineError::Internal(
                "multiplexed run without temporary paths".to_string(),
            ));
        };

        self.storage.prepare_temp_dir().await?;

        self.advance(Phase::DownloadingVideo)?;
        self.transfer(&video, &temp_video, ProgressStage::Video, progress)
            .await?;

        self.advance(Phase::DownloadingAudio)?;
        self.transfer(&audio, &temp_audio, ProgressStage::Audio, progress)
            .await?;

        self.ensure_not_cancelled()?;
        self.advance(Phase::Muxing)?;
        let reporter = ProgressReporter::new(ProgressStage::Muxing, None, progress.clone());
        reporter.started().await;

        let job = MuxJob::new(temp_video, temp_audio, output.clone())
            .with_duration(self.state.request().duration_secs);
        info!(muxer = self.muxer.name(), "Multiplexing into {}", output.display());
        let outcome = self.muxer.mux(&job, &reporter, &self.cancel).await?;
        outcome.into_result()?;

        Ok(output)
    }

    /// Enqueue one transfer and wait for its completion event.
    async fn transfer(
        &mut self,
        stream: &StreamRef,
        destination: &Path,
        stage: ProgressStage,
        progress: &mpsc::Sender<ProgressUpdate>,
    ) -> Result<TransferHandle, PipelineError> {
        self.ensure_not_cancelled()?;

        let reporter = ProgressReporter::new(stage, Some(stream.describe()), progress.clone());
        reporter.started().await;

        let handle = self.transfers.enqueue(&stream.url, destination)?;
        match stage {
            ProgressStage::Audio => self.state.set_audio_transfer(handle),
            ProgressStage::Video | ProgressStage::Muxing => self.state.set_video_transfer(handle),
        }
        info!(
            handle = %handle,
            url = %stream.url,
            destination = %destination.display(),
            "Enqueued {} transfer",
            stream.describe()
        );

        let cancel = self.cancel.clone();
        let waiter = &mut self.waiter;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if self.transfers.cancel(handle) {
                    debug!(handle = %handle, "Cancelled in-flight transfer");
                }
                Err(PipelineError::Cancelled)
            }
            result = waiter.wait_for(handle, |done, total| {
                reporter.report(ProgressSnapshot::from_bytes(done, total))
            }) => {
                // A lost completion leaves the transfer running.
                if let Err(PipelineError::TransferFailed { reason, .. }) = &result
                    && reason.starts_with("completion event lost")
                    && self.transfers.cancel(handle)
                {
                    debug!(handle = %handle, "Cancelled transfer with a lost completion");
                }
                result.map(|()| handle)
            }
        }
    }

    fn selected_stream(&self, stage: ProgressStage) -> Result<StreamRef, PipelineError> {
        let request = self.state.request();
        let stream = match stage {
            ProgressStage::Audio => request.audio_stream.as_ref(),
            ProgressStage::Video | ProgressStage::Muxing => request.video_stream.as_ref(),
        };
        stream
            .cloned()
            .ok_or_else(|| PipelineError::Internal(format!("no stream selected for {stage}")))
    }

    fn ensure_not_cancelled(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn advance(&mut self, next: Phase) -> Result<(), PipelineError> {
        let from = self.state.phase();
        self.state.advance(next)?;
        self.phase_tx.send_replace(next);
        info!(from = %from, to = %next, "Pipeline phase changed");
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

async fn forward_progress(mut rx: mpsc::Receiver<ProgressUpdate>, notifier: Arc<dyn Notifier>) {
    while let Some(update) = rx.recv().await {
        notifier.show_progress(&update.label());
    }
}
