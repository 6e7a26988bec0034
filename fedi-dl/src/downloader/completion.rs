//! Correlation of shared transfer events back to one awaited handle.

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::traits::{TransferEvent, TransferHandle};
use crate::error::PipelineError;

/// Waits on the shared transfer event stream for specific handles.
///
/// The receiver must be created before the awaited transfer is enqueued,
/// otherwise a fast completion could be published before anyone listens.
pub struct CompletionWaiter {
    events: broadcast::Receiver<TransferEvent>,
}

impl CompletionWaiter {
    pub fn new(events: broadcast::Receiver<TransferEvent>) -> Self {
        Self { events }
    }

    /// Wait until `handle` finishes.
    ///
    /// Progress for `handle` is forwarded to `on_progress`. Events for any
    /// other handle are ignored. A closed stream counts as a failure of the
    /// awaited transfer, and so does a lagged receiver: the skipped events
    /// may have held the awaited completion.
    pub async fn wait_for<F>(
        &mut self,
        handle: TransferHandle,
        mut on_progress: F,
    ) -> Result<(), PipelineError>
    where
        F: FnMut(u64, Option<u64>),
    {
        loop {
            match self.events.recv().await {
                Ok(TransferEvent::Finished(completion)) if completion.handle == handle => {
                    return if completion.succeeded {
                        Ok(())
                    } else {
                        Err(PipelineError::transfer_failed(
                            handle,
                            completion
                                .reason
                                .unwrap_or_else(|| "transfer reported failure".to_string()),
                        ))
                    };
                }
                Ok(TransferEvent::Progress {
                    handle: event_handle,
                    bytes_done,
                    bytes_total,
                }) if event_handle == handle => on_progress(bytes_done, bytes_total),
                Ok(other) => {
                    debug!(
                        awaited = %handle,
                        received = %other.handle(),
                        "Ignoring event for unrelated transfer"
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(awaited = %handle, skipped, "Transfer event receiver lagged");
                    return Err(PipelineError::transfer_failed(
                        handle,
                        format!("completion event lost: receiver lagged by {skipped} events"),
                    ));
                }
                Err(RecvError::Closed) => {
                    return Err(PipelineError::transfer_failed(
                        handle,
                        "transfer event stream closed",
                    ));
                }
            }
        }
    }
}
