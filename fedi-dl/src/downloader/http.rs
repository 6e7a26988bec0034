//! HTTP transfer manager backed by `reqwest`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::traits::{TransferCompletion, TransferEvent, TransferHandle, TransferManager};
use crate::config::TransferConfig;
use crate::error::PipelineError;
use crate::utils::fs::{self, io_error};
use crate::{Error, Result};

/// Minimum interval between two progress events of one transfer.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Suffix of the file a transfer writes to before it completes.
const PARTIAL_SUFFIX: &str = ".part";

/// Downloads plain HTTP(S) resources to local files.
///
/// Each transfer runs on its own tokio task and writes into
/// `<destination>.part`; the partial file is renamed onto the destination
/// only after the whole body has been received.
pub struct HttpTransferManager {
    client: reqwest::Client,
    event_tx: broadcast::Sender<TransferEvent>,
    active: Arc<DashMap<TransferHandle, CancellationToken>>,
}

impl HttpTransferManager {
    /// Build a manager with its own HTTP client.
    pub fn new(config: &TransferConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .build()?;
        Ok(Self::with_client(client, config.event_capacity))
    }

    /// Build a manager around an existing client.
    pub fn with_client(client: reqwest::Client, event_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_capacity.max(1));
        Self {
            client,
            event_tx,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Number of transfers currently in flight.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    fn parse_url(url: &str) -> std::result::Result<Url, PipelineError> {
        let parsed =
            Url::parse(url).map_err(|e| PipelineError::enqueue_rejected(url, e.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => Ok(parsed),
            other => Err(PipelineError::enqueue_rejected(
                url,
                format!("unsupported scheme '{other}'"),
            )),
        }
    }
}

impl TransferManager for HttpTransferManager {
    fn enqueue(
        &self,
        url: &str,
        destination: &Path,
    ) -> std::result::Result<TransferHandle, PipelineError> {
        let parsed = Self::parse_url(url)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| PipelineError::enqueue_rejected(url, "no async runtime available"))?;

        let handle = TransferHandle::next();
        let token = CancellationToken::new();
        self.active.insert(handle, token.clone());

        info!(%handle, url = %parsed, destination = %destination.display(), "Transfer enqueued");

        let job = TransferJob {
            handle,
            client: self.client.clone(),
            url: parsed,
            destination: destination.to_path_buf(),
            event_tx: self.event_tx.clone(),
        };
        let active = Arc::clone(&self.active);
        let event_tx = self.event_tx.clone();

        runtime.spawn(async move {
            let partial = job.partial_path();
            let outcome = tokio::select! {
                _ = token.cancelled() => Err(Error::Other("transfer cancelled".to_string())),
                result = job.run() => result,
            };
            active.remove(&handle);

            let completion = match outcome {
                Ok(bytes) => {
                    info!(%handle, bytes, "Transfer completed");
                    TransferCompletion::success(handle)
                }
                Err(e) => {
                    warn!(%handle, error = %e, "Transfer failed");
                    if let Err(cleanup) = fs::remove_file_if_exists(&partial).await {
                        warn!(%handle, error = %cleanup, "Failed to remove partial file");
                    }
                    TransferCompletion::failure(handle, e.to_string())
                }
            };

            // No subscribers simply means nobody is waiting on this transfer.
            let _ = event_tx.send(TransferEvent::Finished(completion));
        });

        Ok(handle)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.event_tx.subscribe()
    }

    fn cancel(&self, handle: TransferHandle) -> bool {
        match self.active.get(&handle) {
            Some(token) => {
                debug!(%handle, "Cancelling transfer");
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// One HTTP transfer, owned by its task.
struct TransferJob {
    handle: TransferHandle,
    client: reqwest::Client,
    url: Url,
    destination: PathBuf,
    event_tx: broadcast::Sender<TransferEvent>,
}

impl TransferJob {
    fn partial_path(&self) -> PathBuf {
        let mut name = self.destination.as_os_str().to_owned();
        name.push(PARTIAL_SUFFIX);
        PathBuf::from(name)
    }

    /// Fetch the body into the partial file and promote it. Returns the byte count.
    async fn run(&self) -> Result<u64> {
        fs::ensure_parent_dir(&self.destination).await?;
        let partial = self.partial_path();

        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?;
        let bytes_total = response.content_length();

        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| io_error("creating file", &partial, e))?;

        let mut stream = response.bytes_stream();
        let mut bytes_done = 0u64;
        let mut last_report = Instant::now();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| io_error("writing file", &partial, e))?;
            bytes_done += chunk.len() as u64;

            if last_report.elapsed() >= PROGRESS_INTERVAL {
                last_report = Instant::now();
                let _ = self.event_tx.send(TransferEvent::Progress {
                    handle: self.handle,
                    bytes_done,
                    bytes_total,
                });
            }
        }

        if let Some(expected) = bytes_total
            && expected != bytes_done
        {
            return Err(Error::Other(format!(
                "body truncated: received {bytes_done} of {expected} bytes"
            )));
        }

        file.flush()
            .await
            .map_err(|e| io_error("flushing file", &partial, e))?;
        drop(file);

        fs::move_file(&partial, &self.destination).await?;
        Ok(bytes_done)
    }
}
