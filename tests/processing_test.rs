//! Transcode worker: end-to-end processing, failures, retries and recovery.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use common::{test_config, StubTranscoder, TestHarness, PROBED_DURATION_SECS, SEGMENTS_PER_RUNG};
use tokio_util::sync::CancellationToken;
use vf_core::events::EventPayload;
use vf_core::{Category, VideoStatus, QUALITY_LADDER};
use vf_db::queries::{jobs, videos};
use vf_pipeline::JobOutcome;
use vf_store::content_type;

#[tokio::test]
async fn demo_upload_is_processed_to_ready() {
    let h = TestHarness::new();
    let (initiated, parts) = h
        .upload_parts("demo.mp4", 104_857_600, Category::DailyClasses)
        .await;
    assert_eq!(initiated.total_parts, 1);
    let video_id = initiated.video_id;
    h.pipeline
        .uploads
        .complete_upload(video_id, &initiated.upload_id, parts)
        .await
        .unwrap();
    assert_eq!(h.video(video_id).status, VideoStatus::Uploaded);

    let outcome = h.run_next_job().await.expect("a job was queued");
    let manifest = assert_matches!(outcome, JobOutcome::Completed(m) => m);
    let master_key = format!("daily-classes/{video_id}/master.m3u8");
    assert_eq!(manifest.master_playlist_key, master_key);

    let video = h.video(video_id);
    assert_eq!(video.status, VideoStatus::Ready);
    assert_eq!(
        video.available_qualities(),
        vec!["1080p", "720p", "480p", "360p"]
    );
    assert_eq!(video.manifest.as_ref(), Some(&manifest));
    assert_eq!(video.progress, 1.0);
    assert_eq!(video.duration_secs, Some(PROBED_DURATION_SECS));
    assert_eq!(video.media_metadata.as_ref().map(|m| m.width), Some(1920));
    assert!(video.processed_at.is_some());
    assert!(video.processing_error.is_none());
    assert!(video.upload_session.is_none());

    // Published objects.
    let master = h.store.object(&master_key).expect("master playlist uploaded");
    let master = String::from_utf8(master.to_vec()).unwrap();
    let lines: Vec<&str> = master.lines().collect();
    assert_eq!(lines.len(), 2 + 2 * QUALITY_LADDER.len());
    assert_eq!(lines[3], "1080p/index.m3u8");
    assert_eq!(lines[9], "360p/index.m3u8");
    assert_eq!(
        h.store.content_type(&master_key).as_deref(),
        Some(content_type::HLS_PLAYLIST)
    );

    for rung in QUALITY_LADDER.iter() {
        let prefix = format!("daily-classes/{video_id}/{}/", rung.quality);
        let keys = h.store.keys_with_prefix(&prefix);
        assert_eq!(keys.len(), SEGMENTS_PER_RUNG + 1, "{keys:?}");
        assert!(keys.contains(&format!("{prefix}index.m3u8")));
        let segment = format!("{prefix}segment_000.ts");
        assert_eq!(
            h.store.content_type(&segment).as_deref(),
            Some(content_type::MPEG_TS)
        );
    }

    let thumbnail_key = format!("daily-classes/thumbnails/daily_classes/{video_id}_thumbnail.jpg");
    assert_eq!(video.thumbnail_key.as_deref(), Some(thumbnail_key.as_str()));
    assert_eq!(
        h.store.content_type(&thumbnail_key).as_deref(),
        Some(content_type::JPEG)
    );

    // Job bookkeeping and scratch space.
    let jobs = jobs::list_jobs_for_video(&h.conn(), video_id).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, "completed");
    assert_eq!(h.scratch_entries(), 0);
    assert!(h.run_next_job().await.is_none());

    let names = h.event_names(video_id);
    assert_eq!(names.first(), Some(&"upload-initiated"));
    assert_eq!(names.last(), Some(&"processing-completed"));
    assert!(names.contains(&"processing-started"));
}

#[tokio::test]
async fn progress_is_reported_monotonically_per_rung() {
    let h = TestHarness::new();
    let video_id = h.uploaded_video(Category::Stocks).await;
    h.run_next_job().await.unwrap();

    let progress: Vec<f64> = h
        .events()
        .into_iter()
        .filter_map(|e| match e.payload {
            EventPayload::ProcessingProgress {
                video_id: id,
                progress,
                ..
            } if id == video_id => Some(progress),
            _ => None,
        })
        .collect();

    // Two reports per rung: half way and done.
    assert_eq!(progress.len(), 2 * QUALITY_LADDER.len());
    assert!(progress.windows(2).all(|w| w[0] < w[1]), "{progress:?}");
    assert_eq!(progress[1], 0.25);
    assert_eq!(progress[2], 0.375);
    assert_eq!(progress.last(), Some(&1.0));
}

#[tokio::test]
async fn parallel_rungs_reach_ready_with_monotonic_progress() {
    let mut config = test_config();
    config.transcode.max_parallel_rungs = 2;
    let h = TestHarness::with(config, StubTranscoder::new());
    let video_id = h.uploaded_video(Category::MasterClasses).await;

    let outcome = h.run_next_job().await.unwrap();
    assert_matches!(outcome, JobOutcome::Completed(_));

    let video = h.video(video_id);
    assert_eq!(video.status, VideoStatus::Ready);
    assert_eq!(
        video.available_qualities(),
        vec!["1080p", "720p", "480p", "360p"]
    );
    assert_eq!(video.progress, 1.0);
    assert_eq!(h.transcoder.encode_count(), QUALITY_LADDER.len());

    let progress: Vec<f64> = h
        .events()
        .into_iter()
        .filter_map(|e| match e.payload {
            EventPayload::ProcessingProgress {
                video_id: id,
                progress,
                ..
            } if id == video_id => Some(progress),
            _ => None,
        })
        .collect();
    assert_eq!(progress.len(), 2 * QUALITY_LADDER.len());
    assert!(progress.windows(2).all(|w| w[0] < w[1]), "{progress:?}");
    assert_eq!(progress.last(), Some(&1.0));
    assert_eq!(h.scratch_entries(), 0);
}

#[tokio::test]
async fn failing_second_rung_leaves_error_without_manifest() {
    let h = TestHarness::with_transcoder(StubTranscoder::fail_on_rung(1));
    let video_id = h.uploaded_video(Category::DailyClasses).await;

    let outcome = h.run_next_job().await.unwrap();
    let error = assert_matches!(
        outcome,
        JobOutcome::Failed { error, will_retry: false } => error
    );
    assert!(error.contains("720p"), "{error}");

    let video = h.video(video_id);
    assert_eq!(video.status, VideoStatus::Error);
    assert_eq!(video.processing_error.as_deref(), Some(error.as_str()));
    assert!(video.manifest.is_none());
    assert!(video.available_qualities().is_empty());

    // Rungs 3 and 4 never started and nothing was published.
    assert_eq!(h.transcoder.encode_count(), 2);
    assert!(h
        .store
        .object(&format!("daily-classes/{video_id}/master.m3u8"))
        .is_none());
    for rung in QUALITY_LADDER.iter() {
        let prefix = format!("daily-classes/{video_id}/{}/", rung.quality);
        assert!(h.store.keys_with_prefix(&prefix).is_empty());
    }
    assert_eq!(h.scratch_entries(), 0);

    let jobs = jobs::list_jobs_for_video(&h.conn(), video_id).unwrap();
    assert_eq!(jobs[0].status, "failed");
    assert_eq!(
        h.event_names(video_id).last(),
        Some(&"processing-failed")
    );
}

#[tokio::test]
async fn playlist_referencing_missing_segment_fails_the_job() {
    let h = TestHarness::with_transcoder(StubTranscoder::missing_segment("segment_001.ts"));
    let video_id = h.uploaded_video(Category::Psychology).await;

    let outcome = h.run_next_job().await.unwrap();
    let error = assert_matches!(outcome, JobOutcome::Failed { error, .. } => error);
    assert!(error.contains("missing segment segment_001.ts"), "{error}");

    let video = h.video(video_id);
    assert_eq!(video.status, VideoStatus::Error);
    assert!(video.manifest.is_none());
    assert!(h
        .store
        .object(&format!("psychology/{video_id}/master.m3u8"))
        .is_none());
}

#[tokio::test]
async fn missing_source_object_fails_the_job() {
    let h = TestHarness::new();
    let video_id = h.uploaded_video(Category::Stocks).await;
    h.store.fail_next("head_object");

    let outcome = h.run_next_job().await.unwrap();
    assert_matches!(outcome, JobOutcome::Failed { will_retry: false, .. });
    assert_eq!(h.video(video_id).status, VideoStatus::Error);
}

#[tokio::test]
async fn retryable_failure_is_rescheduled_then_succeeds() {
    let mut config = test_config();
    config.worker.retry.max_retries = 1;
    config.worker.retry.initial_backoff_secs = 0;
    let h = TestHarness::with(config, StubTranscoder::fail_on_rung_times(0, 1));
    let video_id = h.uploaded_video(Category::Stocks).await;
    let version_before = h.video(video_id).version;

    let outcome = h.run_next_job().await.unwrap();
    assert_matches!(outcome, JobOutcome::Failed { will_retry: true, .. });

    // Reset through the reprocess path: ERROR -> UPLOADED.
    let video = h.video(video_id);
    assert_eq!(video.status, VideoStatus::Uploaded);
    assert!(video.version > version_before);
    let jobs_now = jobs::list_jobs_for_video(&h.conn(), video_id).unwrap();
    assert_eq!(jobs_now.len(), 1);
    assert_eq!(jobs_now[0].status, "queued");
    assert_eq!(jobs_now[0].retry_count, 1);
    assert!(jobs_now[0].scheduled_for.is_some());

    let failed_event = h.events().into_iter().find_map(|e| match e.payload {
        EventPayload::ProcessingFailed { will_retry, .. } => Some(will_retry),
        _ => None,
    });
    assert_eq!(failed_event, Some(true));

    let outcome = h.run_next_job().await.unwrap();
    assert_matches!(outcome, JobOutcome::Completed(_));
    assert_eq!(h.video(video_id).status, VideoStatus::Ready);
    let jobs_now = jobs::list_jobs_for_video(&h.conn(), video_id).unwrap();
    assert_eq!(jobs_now[0].status, "completed");
}

#[tokio::test]
async fn retries_stop_when_budget_is_spent() {
    let mut config = test_config();
    config.worker.retry.max_retries = 1;
    config.worker.retry.initial_backoff_secs = 0;
    let h = TestHarness::with(config, StubTranscoder::fail_on_rung(0));
    let video_id = h.uploaded_video(Category::Stocks).await;

    assert_matches!(
        h.run_next_job().await.unwrap(),
        JobOutcome::Failed { will_retry: true, .. }
    );
    assert_matches!(
        h.run_next_job().await.unwrap(),
        JobOutcome::Failed { will_retry: false, .. }
    );
    assert!(h.run_next_job().await.is_none());

    let video = h.video(video_id);
    assert_eq!(video.status, VideoStatus::Error);
    assert!(video.processing_error.is_some());
    let jobs_now = jobs::list_jobs_for_video(&h.conn(), video_id).unwrap();
    assert_eq!(jobs_now[0].status, "failed");
}

#[tokio::test]
async fn job_for_aborted_upload_is_dropped_as_stale() {
    let h = TestHarness::new();
    let video_id = h.uploaded_video(Category::Stocks).await;
    let upload_id = videos::get_upload_id(&h.conn(), video_id).unwrap().unwrap();
    h.pipeline
        .uploads
        .abort_upload(video_id, &upload_id)
        .await
        .unwrap();

    let outcome = h.run_next_job().await.unwrap();
    assert_eq!(outcome, JobOutcome::Stale);
    assert_eq!(h.transcoder.encode_count(), 0);

    let video = h.video(video_id);
    assert_eq!(video.status, VideoStatus::Error);
    assert_eq!(
        video.processing_error.as_deref(),
        Some(vf_pipeline::ABORTED_MESSAGE)
    );

    let jobs_now = jobs::list_jobs_for_video(&h.conn(), video_id).unwrap();
    assert_eq!(jobs_now[0].status, "failed");
    assert!(jobs_now[0].error.as_deref().unwrap().contains("stale job"));
}

#[tokio::test]
async fn interrupted_job_resumes_after_recovery() {
    let h = TestHarness::new();
    let video_id = h.uploaded_video(Category::MasterClasses).await;

    // A previous process claimed the job and the video, then died.
    let job = h.pipeline.queue.dequeue("crashed-worker").unwrap().unwrap();
    assert!(videos::claim_for_processing(&h.conn(), video_id, job.id).unwrap());
    assert!(h.run_next_job().await.is_none());

    assert_eq!(h.pipeline.queue.recover().unwrap(), 1);
    let outcome = h.run_next_job().await.unwrap();
    assert_matches!(outcome, JobOutcome::Completed(_));
    assert_eq!(h.video(video_id).status, VideoStatus::Ready);
}

#[tokio::test]
async fn worker_pool_drains_the_queue() {
    let mut config = test_config();
    config.worker.concurrency = 2;
    config.worker.poll_interval_ms = 20;
    let h = TestHarness::with(config, StubTranscoder::new());

    let cancel = CancellationToken::new();
    let pool = h.pipeline.start_workers(cancel.clone()).unwrap();
    assert_eq!(pool.len(), 2);

    let first = h.uploaded_video(Category::Stocks).await;
    let second = h.uploaded_video(Category::Psychology).await;

    let all_ready = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let ready = [first, second]
                .iter()
                .all(|id| h.video(*id).status == VideoStatus::Ready);
            if ready {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(all_ready.is_ok(), "videos did not reach READY in time");

    cancel.cancel();
    pool.join().await;
}
