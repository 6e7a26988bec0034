mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use common::*;
use fedi_dl::PipelineError;
use fedi_dl::domain::DownloadRequest;
use fedi_dl::downloader::{TransferCompletion, TransferEvent, TransferHandle};
use fedi_dl::pipeline::{Mode, Phase};

#[tokio::test]
async fn test_mux_run_succeeds() {
    let h = Harness::scripted();
    let run = h.controller.start(mux_request("abc")).unwrap();
    assert_eq!(run.mode(), Mode::Mux);
    assert!(h.controller.is_running());

    let video = h.transfers.next_enqueued().await;
    assert_eq!(video.url, VIDEO_URL);
    assert_eq!(video.destination, h.temp_dir().join("abc-video"));
    h.transfers.complete(video.handle, true);

    let audio = h.transfers.next_enqueued().await;
    assert_eq!(audio.url, AUDIO_URL);
    assert_eq!(audio.destination, h.temp_dir().join("abc-audio"));
    h.transfers.complete(audio.handle, true);

    let report = within(run.wait()).await;
    let output = h.output_dir().join("abc.mkv");

    assert_eq!(report.result, Ok(output.clone()));
    assert_eq!(
        report.phases,
        vec![
            Phase::Init,
            Phase::DownloadingVideo,
            Phase::DownloadingAudio,
            Phase::Muxing,
            Phase::Succeeded
        ]
    );

    let calls = h.muxer.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].job.video_path, video.destination);
    assert_eq!(calls[0].job.audio_path, audio.destination);
    assert_eq!(calls[0].job.output_path, output);
    assert_eq!(calls[0].job.duration_secs, 120);
    assert!(calls[0].video_existed && calls[0].audio_existed);

    assert!(output.is_file());
    assert!(!h.temp_dir().exists());
    assert_eq!(h.notifier.successes(), vec![output]);
    assert!(h.notifier.failures().is_empty());
    assert!(!h.controller.is_running());
}

#[tokio::test]
async fn test_audio_failure_skips_muxing() {
    let h = Harness::scripted();
    let run = h.controller.start(mux_request("abc")).unwrap();

    let video = h.transfers.next_enqueued().await;
    h.transfers.complete(video.handle, true);
    let audio = h.transfers.next_enqueued().await;
    h.transfers.complete(audio.handle, false);

    let report = within(run.wait()).await;

    assert_eq!(
        report.phases,
        vec![
            Phase::Init,
            Phase::DownloadingVideo,
            Phase::DownloadingAudio,
            Phase::Failed
        ]
    );
    match report.result {
        Err(PipelineError::TransferFailed { handle, reason }) => {
            assert_eq!(handle, audio.handle);
            assert!(reason.contains("404"));
        }
        other => panic!("expected transfer failure, got {other:?}"),
    }
    assert!(h.muxer.calls().is_empty());
    assert!(!h.temp_dir().exists());
    assert_eq!(h.notifier.failures().len(), 1);
    assert!(h.notifier.successes().is_empty());
    assert!(!h.controller.is_running());
}

#[tokio::test]
async fn test_video_failure_never_enqueues_audio() {
    let h = Harness::scripted();
    let run = h.controller.start(mux_request("abc")).unwrap();

    let video = h.transfers.next_enqueued().await;
    h.transfers.complete(video.handle, false);

    let report = within(run.wait()).await;

    assert_eq!(report.final_phase(), Phase::Failed);
    assert_eq!(h.transfers.enqueued().len(), 1);
    assert!(h.muxer.calls().is_empty());
    assert!(!h.temp_dir().exists());
}

#[tokio::test]
async fn test_audio_only_downloads_straight_to_output() {
    let h = Harness::new(
        ScriptedTransferManager::auto_complete(),
        RecordingMuxer::exiting_with(0),
    );
    // Leftovers in the temporary directory belong to nobody in this run.
    std::fs::create_dir_all(h.temp_dir()).unwrap();
    std::fs::write(h.temp_dir().join("sentinel"), b"keep").unwrap();

    let request = DownloadRequest::new("abc", "m4a").with_audio(audio_stream());
    let run = h.controller.start(request).unwrap();
    assert_eq!(run.mode(), Mode::AudioOnly);

    let report = within(run.wait()).await;
    let output = h.output_dir().join("abc.m4a");

    assert_eq!(report.result, Ok(output.clone()));
    assert_eq!(
        report.phases,
        vec![Phase::Init, Phase::DownloadingAudioOnly, Phase::Succeeded]
    );
    let enqueued = h.transfers.enqueued();
    assert_eq!(enqueued.len(), 1);
    assert_eq!(enqueued[0].destination, output);
    assert!(h.muxer.calls().is_empty());
    assert!(h.temp_dir().join("sentinel").is_file());
    assert_eq!(h.notifier.successes(), vec![output]);
}

#[tokio::test]
async fn test_video_only_downloads_straight_to_output() {
    let h = Harness::new(
        ScriptedTransferManager::auto_complete(),
        RecordingMuxer::exiting_with(0),
    );
    let request = DownloadRequest::new("abc", ".mp4").with_video(video_stream());

    let report = within(h.controller.start(request).unwrap().wait()).await;

    assert_eq!(
        report.phases,
        vec![Phase::Init, Phase::DownloadingVideo, Phase::Succeeded]
    );
    assert!(h.output_dir().join("abc.mp4").is_file());
    assert!(h.muxer.calls().is_empty());
}

#[tokio::test]
async fn test_start_while_muxing_is_rejected() {
    let gate = Arc::new(Notify::new());
    let h = Harness::new(
        ScriptedTransferManager::auto_complete(),
        RecordingMuxer::gated(0, gate.clone()),
    );

    let run = h.controller.start(mux_request("first")).unwrap();
    let mut phase = run.watch_phase();
    within(phase.wait_for(|p| *p == Phase::Muxing))
        .await
        .unwrap();
    let transfers_before = h.transfers.enqueued().len();

    let second = h.controller.start(mux_request("second"));

    assert!(matches!(second, Err(PipelineError::AlreadyRunning)));
    assert_eq!(h.transfers.enqueued().len(), transfers_before);
    assert_eq!(run.phase(), Phase::Muxing);

    gate.notify_one();
    let report = within(run.wait()).await;
    assert!(report.succeeded());
    assert!(h.output_dir().join("first.mkv").is_file());
    assert!(!h.output_dir().join("second.mkv").exists());

    // The guard is free again once the first run has finished.
    let third = h.controller.start(mux_request("third")).unwrap();
    gate.notify_one();
    assert!(within(third.wait()).await.succeeded());
}

#[tokio::test]
async fn test_second_start_issues_no_enqueue() {
    let h = Harness::scripted();
    let run = h.controller.start(mux_request("abc")).unwrap();
    let video = h.transfers.next_enqueued().await;

    assert!(matches!(
        h.controller.start(mux_request("other")),
        Err(PipelineError::AlreadyRunning)
    ));
    assert_eq!(h.transfers.enqueued(), vec![video.clone()]);

    h.transfers.complete(video.handle, false);
    within(run.wait()).await;
}

#[tokio::test]
async fn test_request_without_streams_is_rejected() {
    let h = Harness::scripted();

    let result = h.controller.start(DownloadRequest::new("abc", ".mkv"));

    assert!(matches!(result, Err(PipelineError::InvalidRequest(_))));
    assert!(!h.controller.is_running());
    assert!(h.transfers.enqueued().is_empty());
    assert!(h.notifier.events().is_empty());
}

#[tokio::test]
async fn test_invalid_request_does_not_disturb_active_run() {
    let h = Harness::scripted();
    let run = h.controller.start(mux_request("abc")).unwrap();

    let result = h.controller.start(DownloadRequest::new("", ".mkv").with_video(video_stream()));
    assert!(matches!(result, Err(PipelineError::InvalidRequest(_))));
    assert!(h.controller.is_running());

    let video = h.transfers.next_enqueued().await;
    h.transfers.complete(video.handle, false);
    within(run.wait()).await;
    assert!(!h.controller.is_running());
}

#[tokio::test]
async fn test_foreign_completions_are_ignored() {
    let h = Harness::scripted();
    let run = h.controller.start(mux_request("abc")).unwrap();
    let video = h.transfers.next_enqueued().await;

    let foreign = TransferHandle::new(u64::MAX);
    h.transfers.progress(foreign, 10, 20);
    h.transfers
        .emit(TransferEvent::Finished(TransferCompletion::success(foreign)));
    h.transfers
        .emit(TransferEvent::Finished(TransferCompletion::failure(foreign, "other download")));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(run.phase(), Phase::DownloadingVideo);
    assert_eq!(h.transfers.enqueued().len(), 1);
    assert!(h.muxer.calls().is_empty());

    h.transfers.complete(video.handle, true);
    let audio = h.transfers.next_enqueued().await;

    // A stale event for the finished video transfer must not complete the audio one.
    h.transfers
        .emit(TransferEvent::Finished(TransferCompletion::success(video.handle)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(run.phase(), Phase::DownloadingAudio);
    assert!(h.muxer.calls().is_empty());

    h.transfers.complete(audio.handle, true);
    let report = within(run.wait()).await;
    assert!(report.succeeded());
    assert_eq!(h.muxer.calls().len(), 1);
}

#[tokio::test]
async fn test_mux_failure_reports_log_tail() {
    let h = Harness::new(
        ScriptedTransferManager::auto_complete(),
        RecordingMuxer::exiting_with(1),
    );

    let report = within(h.controller.start(mux_request("abc")).unwrap().wait()).await;

    match &report.result {
        Err(PipelineError::MuxFailed { exit_code, log_tail }) => {
            assert_eq!(*exit_code, Some(1));
            assert!(log_tail.contains("Invalid data"));
        }
        other => panic!("expected mux failure, got {other:?}"),
    }
    assert_eq!(report.final_phase(), Phase::Failed);
    assert!(!h.output_dir().join("abc.mkv").exists());
    assert!(!h.temp_dir().exists());

    let failures = h.notifier.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("exit code 1"));
}

#[tokio::test]
async fn test_muxer_panic_fails_run_and_cleans_up() {
    let h = Harness::new(
        ScriptedTransferManager::auto_complete(),
        RecordingMuxer::panicking(),
    );

    let run = h.controller.start(mux_request("abc")).unwrap();
    let mut phase = run.watch_phase();
    let report = within(run.wait()).await;

    match &report.result {
        Err(PipelineError::Internal(reason)) => assert!(reason.contains("muxer crashed"), "{reason}"),
        other => panic!("expected internal failure, got {other:?}"),
    }
    assert_eq!(report.final_phase(), Phase::Failed);
    assert_eq!(*phase.borrow_and_update(), Phase::Failed);
    assert_eq!(h.muxer.calls().len(), 1);
    assert!(!h.temp_dir().exists());
    assert!(!h.controller.is_running());

    let failures = h.notifier.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("muxer crashed"));
    assert!(h.notifier.successes().is_empty());
}

#[tokio::test]
async fn test_enqueue_rejection_fails_run() {
    let h = Harness::scripted();
    h.transfers.reject(VIDEO_URL);

    let report = within(h.controller.start(mux_request("abc")).unwrap().wait()).await;

    assert!(matches!(
        report.result,
        Err(PipelineError::EnqueueRejected { ref url, .. }) if url == VIDEO_URL
    ));
    assert_eq!(
        report.phases,
        vec![Phase::Init, Phase::DownloadingVideo, Phase::Failed]
    );
    assert!(!h.temp_dir().exists());
    assert_eq!(h.notifier.failures().len(), 1);
}

#[tokio::test]
async fn test_cancel_during_transfer() {
    let h = Harness::scripted();
    let run = h.controller.start(mux_request("abc")).unwrap();
    let video = h.transfers.next_enqueued().await;

    assert!(h.controller.cancel());
    let report = within(run.wait()).await;

    assert_eq!(report.result, Err(PipelineError::Cancelled));
    assert_eq!(report.final_phase(), Phase::Failed);
    assert_eq!(h.transfers.cancelled(), vec![video.handle]);
    assert!(!h.temp_dir().exists());
    assert_eq!(h.notifier.failures().len(), 1);
    assert!(!h.controller.is_running());
    assert!(!h.controller.cancel());
}

#[tokio::test]
async fn test_cancel_during_muxing() {
    let gate = Arc::new(Notify::new());
    let h = Harness::new(
        ScriptedTransferManager::auto_complete(),
        RecordingMuxer::gated(0, gate),
    );
    let run = h.controller.start(mux_request("abc")).unwrap();
    within(run.watch_phase().wait_for(|p| *p == Phase::Muxing))
        .await
        .unwrap();

    run.cancel();
    let report = within(run.wait()).await;

    assert_eq!(report.result, Err(PipelineError::Cancelled));
    assert!(!h.output_dir().join("abc.mkv").exists());
    assert!(!h.temp_dir().exists());
    assert_eq!(h.notifier.failures().len(), 1);
}

#[tokio::test]
async fn test_progress_labels_precede_terminal_notification() {
    let h = Harness::scripted();
    let run = h.controller.start(mux_request("abc")).unwrap();

    let video = h.transfers.next_enqueued().await;
    h.transfers.progress(video.handle, 500, 1000);
    h.transfers.complete(video.handle, true);
    let audio = h.transfers.next_enqueued().await;
    h.transfers.complete(audio.handle, true);
    within(run.wait()).await;

    let labels = h.notifier.progress_labels();
    assert_eq!(labels.first().map(String::as_str), Some("Downloading video (720p mp4)"));
    assert!(labels.contains(&"Downloading video (720p mp4) 50%".to_string()));
    assert!(labels.contains(&"Downloading audio (128kbps m4a)".to_string()));
    assert!(labels.contains(&"Muxing".to_string()));

    let events = h.notifier.events();
    assert!(matches!(events.last(), Some(Notification::Success(_))));
    assert_eq!(
        events
            .iter()
            .filter(|e| !matches!(e, Notification::Progress(_)))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_stale_temp_files_are_purged_before_mux_run() {
    let h = Harness::new(
        ScriptedTransferManager::auto_complete(),
        RecordingMuxer::exiting_with(0),
    );
    std::fs::create_dir_all(h.temp_dir()).unwrap();
    std::fs::write(h.temp_dir().join("old-video"), b"stale").unwrap();

    let report = within(h.controller.start(mux_request("abc")).unwrap().wait()).await;

    assert!(report.succeeded());
    assert!(!h.temp_dir().exists());
}

#[tokio::test]
async fn test_cleanup_twice_is_a_no_op() {
    let h = Harness::scripted();
    let storage = h.controller.storage();
    storage.prepare_temp_dir().await.unwrap();

    storage.cleanup_temp_dir().await.unwrap();
    storage.cleanup_temp_dir().await.unwrap();
    assert!(!h.temp_dir().exists());
}

#[tokio::test]
async fn test_terminal_phase_is_final() {
    let h = Harness::new(
        ScriptedTransferManager::auto_complete(),
        RecordingMuxer::exiting_with(0),
    );
    let run = h.controller.start(mux_request("abc")).unwrap();
    let phase = run.watch_phase();
    let report = within(run.wait()).await;

    let terminal = report.phases.iter().filter(|p| p.is_terminal()).count();
    assert_eq!(terminal, 1);
    assert_eq!(*phase.borrow(), Phase::Succeeded);

    // Stray events after the run ended change nothing.
    h.transfers
        .emit(TransferEvent::Finished(TransferCompletion::failure(TransferHandle::new(1), "late")));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*phase.borrow(), Phase::Succeeded);
    assert_eq!(h.notifier.successes().len(), 1);
    assert!(h.notifier.failures().is_empty());
}
