//! Notifier: surfaces pipeline progress and results to the user.
//!
//! Calls are fire-and-forget; the pipeline never inspects their outcome.

mod channels;
pub mod events;

use std::path::Path;

pub use channels::{BroadcastNotifier, CompositeNotifier, DEFAULT_EVENT_CAPACITY, LogNotifier};
pub use events::PipelineEvent;

/// Sink for user-facing pipeline notifications.
pub trait Notifier: Send + Sync {
    /// Update the persistent progress label.
    fn show_progress(&self, label: &str);

    /// One-shot notification for a finished run.
    fn report_success(&self, output_path: &Path);

    /// One-shot notification for a failed run.
    fn report_failure(&self, reason: &str);
}
