use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;

use fedi_dl::config::AppConfig;
use fedi_dl::domain::{DownloadRequest, StreamRef};

/// Download one video's streams and multiplex them into a single file.
#[derive(Debug, Parser)]
#[command(name = "fedi-dl", version, about)]
pub struct Args {
    /// Video identifier; also the output file name.
    #[arg(long, required_unless_present = "request")]
    pub id: Option<String>,

    /// URL of the video-only stream.
    #[arg(long)]
    pub video_url: Option<String>,

    /// Quality label of the video stream (e.g. 720p).
    #[arg(long, default_value = "")]
    pub video_quality: String,

    /// Container format of the video stream (e.g. mp4).
    #[arg(long, default_value = "")]
    pub video_format: String,

    /// URL of the audio-only stream.
    #[arg(long)]
    pub audio_url: Option<String>,

    /// Quality label of the audio stream (e.g. 128kbps).
    #[arg(long, default_value = "")]
    pub audio_quality: String,

    /// Container format of the audio stream (e.g. m4a).
    #[arg(long, default_value = "")]
    pub audio_format: String,

    /// Output container extension.
    #[arg(long, default_value = "mkv")]
    pub ext: String,

    /// Video duration in seconds, for mux progress.
    #[arg(long, default_value_t = 0)]
    pub duration: u64,

    /// Read the whole request from a JSON file instead of flags.
    #[arg(long, value_name = "FILE", conflicts_with_all = ["id", "video_url", "audio_url"])]
    pub request: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override the output directory.
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Override the temporary directory.
    #[arg(long, value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Log filter directive applied once logging is up (e.g. `fedi_dl=debug`).
    #[arg(long, value_name = "DIRECTIVE")]
    pub log_filter: Option<String>,
}

impl Args {
    /// Apply directory overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.output_dir {
            config.storage.output_dir = dir.clone();
        }
        if let Some(dir) = &self.temp_dir {
            config.storage.temp_dir = dir.clone();
        }
    }

    pub fn to_request(&self) -> anyhow::Result<DownloadRequest> {
        if let Some(path) = &self.request {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading request file {}", path.display()))?;
            return serde_json::from_str(&raw)
                .with_context(|| format!("parsing request file {}", path.display()));
        }

        let Some(id) = &self.id else {
            bail!("--id is required without --request");
        };
        if self.video_url.is_none() && self.audio_url.is_none() {
            bail!("at least one of --video-url or --audio-url is required");
        }

        let mut request = DownloadRequest::new(id, &self.ext).with_duration(self.duration);
        if let Some(url) = &self.video_url {
            request =
                request.with_video(StreamRef::new(url, &self.video_quality, &self.video_format));
        }
        if let Some(url) = &self.audio_url {
            request =
                request.with_audio(StreamRef::new(url, &self.audio_quality, &self.audio_format));
        }
        Ok(request)
    }
}
