mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fedi_dl::config::AppConfig;
use fedi_dl::downloader::HttpTransferManager;
use fedi_dl::logging;
use fedi_dl::muxer::FfmpegMuxer;
use fedi_dl::notification::LogNotifier;
use fedi_dl::pipeline::{PipelineController, PipelineReport};
use fedi_dl::storage::StorageManager;

use crate::cli::Args;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    match run(args).await {
        Ok(report) if report.succeeded() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<PipelineReport> {
    let mut config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    args.apply_overrides(&mut config);
    config.validate()?;

    let (logging, _guard) = logging::init_logging(
        config.logging.log_dir.as_deref(),
        config.logging.filter.as_deref(),
    )?;
    if let Some(directive) = &args.log_filter {
        logging.set_filter(directive)?;
    }
    info!(filter = %logging.get_filter(), "Logging initialized");
    let shutdown = CancellationToken::new();
    logging.start_retention_cleanup(shutdown.clone());

    let request = args.to_request()?;

    let muxer = FfmpegMuxer::new(config.muxer.clone());
    if request.video_stream.is_some() && request.audio_stream.is_some() {
        match muxer.version() {
            Some(version) => info!("Using {}", version),
            None => warn!(
                binary = %config.muxer.binary_path,
                "ffmpeg could not be executed; multiplexing will fail"
            ),
        }
    }

    let transfers = HttpTransferManager::new(&config.transfer)?;
    let controller = PipelineController::new(
        Arc::new(transfers),
        Arc::new(muxer),
        Arc::new(LogNotifier),
        StorageManager::from_config(&config.storage),
    );

    let run = controller.start(request)?;
    let wait = run.wait();
    tokio::pin!(wait);

    let report = tokio::select! {
        report = &mut wait => report,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling download");
            controller.cancel();
            wait.await
        }
    };

    shutdown.cancel();
    Ok(report)
}
