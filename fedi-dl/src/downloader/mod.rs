//! Transfer manager: fetches elementary streams to local files.
//!
//! The downloader module is responsible for:
//! - Abstracting the download facility behind [`TransferManager`]
//! - Publishing one completion per transfer on a shared event stream
//! - Correlating that stream back to a single awaited handle

mod completion;
mod http;
mod traits;

pub use completion::CompletionWaiter;
pub use http::HttpTransferManager;
pub use traits::{TransferCompletion, TransferEvent, TransferHandle, TransferManager};
