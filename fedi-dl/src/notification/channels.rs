//! Notifier implementations.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info};

use super::Notifier;
use super::events::PipelineEvent;

/// Default capacity of a [`BroadcastNotifier`] channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Writes notifications to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show_progress(&self, label: &str) {
        info!(label, "Download progress");
    }

    fn report_success(&self, output_path: &Path) {
        info!(output = %output_path.display(), "Download finished");
    }

    fn report_failure(&self, reason: &str) {
        error!(reason, "Download failed");
    }
}

/// Publishes [`PipelineEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<PipelineEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn publish(&self, event: PipelineEvent) {
        // Ignore errors - just means no subscribers currently
        let _ = self.tx.send(event);
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl Notifier for BroadcastNotifier {
    fn show_progress(&self, label: &str) {
        self.publish(PipelineEvent::progress(label));
    }

    fn report_success(&self, output_path: &Path) {
        self.publish(PipelineEvent::succeeded(output_path));
    }

    fn report_failure(&self, reason: &str) {
        self.publish(PipelineEvent::failed(reason));
    }
}

/// Forwards every notification to each inner notifier, in order.
#[derive(Clone, Default)]
pub struct CompositeNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl CompositeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl Notifier for CompositeNotifier {
    fn show_progress(&self, label: &str) {
        for notifier in &self.notifiers {
            notifier.show_progress(label);
        }
    }

    fn report_success(&self, output_path: &Path) {
        for notifier in &self.notifiers {
            notifier.report_success(output_path);
        }
    }

    fn report_failure(&self, reason: &str) {
        for notifier in &self.notifiers {
            notifier.report_failure(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_notifier_publishes_events() {
        let notifier = BroadcastNotifier::default();
        let mut rx = notifier.subscribe();

        notifier.show_progress("Downloading video (720p mp4)");
        notifier.report_success(Path::new("/videos/abc.mkv"));

        match rx.recv().await.unwrap() {
            PipelineEvent::Progress { label, .. } => {
                assert_eq!(label, "Downloading video (720p mp4)")
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(rx.recv().await.unwrap().event_type(), "succeeded");
    }

    #[test]
    fn test_broadcast_without_subscribers_does_not_panic() {
        let notifier = BroadcastNotifier::new(0);
        assert_eq!(notifier.subscriber_count(), 0);
        notifier.report_failure("nobody listens");
    }

    #[tokio::test]
    async fn test_composite_fans_out() {
        let first = Arc::new(BroadcastNotifier::default());
        let second = Arc::new(BroadcastNotifier::default());
        let mut rx1 = first.subscribe();
        let mut rx2 = second.subscribe();

        let composite = CompositeNotifier::new()
            .with(first.clone())
            .with(second.clone())
            .with(Arc::new(LogNotifier));
        assert_eq!(composite.len(), 3);

        composite.report_failure("Transfer #1 failed");

        assert_eq!(rx1.recv().await.unwrap().event_type(), "failed");
        assert_eq!(rx2.recv().await.unwrap().event_type(), "failed");
    }
}
