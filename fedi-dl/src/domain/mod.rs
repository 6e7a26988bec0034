//! Domain types handed to the pipeline by the stream selection layer.

pub mod request;

pub use request::{DownloadRequest, StreamRef};
