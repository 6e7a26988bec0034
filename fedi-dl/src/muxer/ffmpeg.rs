//! FFmpeg multiplexer implementation.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use process_utils::{LogTail, describe_exit, exit_code, std_command, tokio_command};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::traits::{MuxJob, MuxOutcome, Muxer};
use crate::config::MuxerConfig;
use crate::error::PipelineError;
use crate::pipeline::{ProgressReporter, ProgressSnapshot};
use crate::utils::fs;

/// Stream-copy multiplexer driving an `ffmpeg` binary.
pub struct FfmpegMuxer {
    config: MuxerConfig,
}

impl FfmpegMuxer {
    pub fn new(config: MuxerConfig) -> Self {
        Self { config }
    }

    /// First line of `<binary> -version`, if the binary can be executed.
    pub fn version(&self) -> Option<String> {
        std_command(&self.config.binary_path)
            .arg("-version")
            .output()
            .ok()
            .filter(|output| output.status.success())
            .and_then(|output| {
                String::from_utf8(output.stdout)
                    .ok()
                    .and_then(|s| s.lines().next().map(|l| l.to_string()))
            })
    }

    /// Hidden sibling of the output path that ffmpeg writes to.
    ///
    /// Keeps the target extension so ffmpeg picks the right container.
    fn staging_path(output: &Path) -> PathBuf {
        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let name = match output.extension() {
            Some(ext) => format!(".{stem}.partial.{}", ext.to_string_lossy()),
            None => format!(".{stem}.partial"),
        };
        output.with_file_name(name)
    }

    /// Build ffmpeg command arguments.
    fn build_args(&self, job: &MuxJob, staging: &Path) -> Vec<String> {
        let mut args = self.config.input_args.clone();

        args.extend(
            ["-y", "-hide_banner", "-nostdin", "-nostats", "-progress", "pipe:1"]
                .iter()
                .map(|s| s.to_string()),
        );

        args.extend([
            "-i".to_string(),
            job.video_path.to_string_lossy().into_owned(),
            "-i".to_string(),
            job.audio_path.to_string_lossy().into_owned(),
        ]);

        // Video from the first input, audio from the second, no re-encoding
        args.extend(
            ["-map", "0:v:0", "-map", "1:a:0", "-c", "copy"]
                .iter()
                .map(|s| s.to_string()),
        );

        args.extend(self.config.output_args.iter().cloned());

        args.push(staging.to_string_lossy().into_owned());
        args
    }

    /// Parse a `-progress` line (`out_time=HH:MM:SS.micros`) into seconds.
    fn parse_progress_line(line: &str) -> Option<f64> {
        let value = line.trim().strip_prefix("out_time=")?;
        Self::parse_time(value)
    }

    /// Parse time string (HH:MM:SS.ms) to seconds.
    fn parse_time(time_str: &str) -> Option<f64> {
        let parts: Vec<&str> = time_str.split(':').collect();
        if parts.len() != 3 {
            return None;
        }

        let hours: f64 = parts[0].parse().ok()?;
        let minutes: f64 = parts[1].parse().ok()?;
        let seconds: f64 = parts[2].parse().ok()?;

        let total = hours * 3600.0 + minutes * 60.0 + seconds;
        (total >= 0.0).then_some(total)
    }

    async fn read_progress<R>(stdout: R, duration_secs: u64, progress: &ProgressReporter)
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(secs) = Self::parse_progress_line(&line) {
                progress.report(ProgressSnapshot::from_out_time(secs, duration_secs));
            }
        }
    }

    async fn read_tail<R>(stderr: R, capacity: usize) -> LogTail
    where
        R: AsyncRead + Unpin,
    {
        let mut tail = LogTail::new(capacity);
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!(target: "fedi_dl::muxer::ffmpeg::stderr", "{}", line);
                    tail.push(line);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Error reading ffmpeg output");
                    break;
                }
            }
        }
        tail
    }

    async fn discard_staging(staging: &Path) {
        if let Err(e) = fs::remove_file_if_exists(staging).await {
            warn!(path = %staging.display(), error = %e, "Failed to remove staging file");
        }
    }

    fn launch_error(&self, reason: impl std::fmt::Display) -> PipelineError {
        PipelineError::MuxFailed {
            exit_code: None,
            log_tail: format!("failed to launch {}: {reason}", self.config.binary_path),
        }
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn mux(
        &self,
        job: &MuxJob,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<MuxOutcome, PipelineError> {
        if let Some(missing) = job.missing_input().await {
            return Err(self.launch_error(format!("input {} does not exist", missing.display())));
        }

        let staging = Self::staging_path(&job.output_path);
        Self::discard_staging(&staging).await;
        fs::ensure_parent_dir(&job.output_path).await?;

        let args = self.build_args(job, &staging);
        info!(binary = %self.config.binary_path, ?args, "Starting ffmpeg mux");

        let mut child = tokio_command(&self.config.binary_path)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.launch_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.launch_error("stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| self.launch_error("stderr was not captured"))?;

        let output = async {
            tokio::join!(
                Self::read_progress(stdout, job.duration_secs, progress),
                Self::read_tail(stderr, self.config.log_tail_lines),
            )
            .1
        };

        let tail = tokio::select! {
            _ = cancel.cancelled() => None,
            tail = output => Some(tail),
        };
        let status = match tail {
            Some(_) => tokio::select! {
                _ = cancel.cancelled() => None,
                status = child.wait() => Some(status),
            },
            None => None,
        };

        let (tail, status) = match (tail, status) {
            (Some(tail), Some(status)) => (tail, status),
            _ => {
                info!("Cancelling ffmpeg mux");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill ffmpeg");
                }
                Self::discard_staging(&staging).await;
                return Err(PipelineError::Cancelled);
            }
        };

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                Self::discard_staging(&staging).await;
                return Err(PipelineError::MuxFailed {
                    exit_code: None,
                    log_tail: format!("failed to wait for ffmpeg: {e}"),
                });
            }
        };

        let outcome = MuxOutcome {
            exit_code: exit_code(&status),
            log_tail: tail.render(),
        };

        if outcome.success() {
            fs::move_file(&staging, &job.output_path).await?;
            info!(output = %job.output_path.display(), "ffmpeg mux finished");
        } else {
            warn!(status = %describe_exit(&status), "ffmpeg mux failed");
            Self::discard_staging(&staging).await;
        }

        Ok(outcome)
    }
}
