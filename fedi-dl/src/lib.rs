//! fedi-dl library crate.
//!
//! Acquires one video's selected elementary streams, multiplexes them when
//! both are present and places the result atomically in the output
//! directory.

pub mod config;
pub mod domain;
pub mod downloader;
pub mod error;
pub mod logging;
pub mod muxer;
pub mod notification;
pub mod pipeline;
pub mod storage;
pub mod utils;

pub use error::{Error, PipelineError, Result};
