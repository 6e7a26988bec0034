//! Multiplexer stage: merges a video-only and an audio-only file into one
//! container without re-encoding.

mod ffmpeg;
mod traits;

pub use ffmpeg::FfmpegMuxer;
pub use traits::{MuxJob, MuxOutcome, Muxer};
