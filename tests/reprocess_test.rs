//! Manual reprocess and archive through the video service.

mod common;

use assert_matches::assert_matches;
use common::{StubTranscoder, TestHarness};
use vf_core::{Category, Error, VideoStatus};
use vf_db::queries::{jobs, videos};
use vf_pipeline::JobOutcome;

#[tokio::test]
async fn reprocess_ready_video_resets_and_requeues() {
    let h = TestHarness::new();
    let video_id = h.uploaded_video(Category::DailyClasses).await;
    h.run_next_job().await.unwrap();
    let ready = h.video(video_id);
    assert_eq!(ready.status, VideoStatus::Ready);

    let reset = h.pipeline.videos.reprocess(video_id, ready.version).unwrap();
    assert_eq!(reset.status, VideoStatus::Uploaded);
    assert_eq!(reset.version, ready.version + 1);
    assert!(reset.manifest.is_none());
    assert!(reset.available_qualities().is_empty());
    assert_eq!(reset.progress, 0.0);

    let queued = jobs::list_jobs_for_video(&h.conn(), video_id).unwrap();
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[1].status, "queued");

    let outcome = h.run_next_job().await.unwrap();
    assert_matches!(outcome, JobOutcome::Completed(_));
    let again = h.video(video_id);
    assert_eq!(again.status, VideoStatus::Ready);
    assert_eq!(again.available_qualities().len(), 4);
}

#[tokio::test]
async fn reprocess_failed_video_recovers() {
    let h = TestHarness::with_transcoder(StubTranscoder::fail_on_rung_times(1, 1));
    let video_id = h.uploaded_video(Category::Stocks).await;
    assert_matches!(h.run_next_job().await.unwrap(), JobOutcome::Failed { .. });

    let failed = h.video(video_id);
    assert_eq!(failed.status, VideoStatus::Error);
    let reset = h.pipeline.videos.reprocess(video_id, failed.version).unwrap();
    assert_eq!(reset.status, VideoStatus::Uploaded);
    assert!(reset.processing_error.is_none());

    assert_matches!(h.run_next_job().await.unwrap(), JobOutcome::Completed(_));
    assert_eq!(h.video(video_id).status, VideoStatus::Ready);
}

#[tokio::test]
async fn reprocess_of_uploaded_video_does_not_double_enqueue() {
    let h = TestHarness::new();
    let video_id = h.uploaded_video(Category::Stocks).await;
    let version = h.video(video_id).version;

    h.pipeline.videos.reprocess(video_id, version).unwrap();
    let queued = jobs::list_jobs_for_video(&h.conn(), video_id).unwrap();
    assert_eq!(queued.len(), 1);
}

#[tokio::test]
async fn stale_version_is_a_conflict() {
    let h = TestHarness::new();
    let video_id = h.uploaded_video(Category::Stocks).await;
    h.run_next_job().await.unwrap();
    let version = h.video(video_id).version;

    assert_matches!(
        h.pipeline.videos.reprocess(video_id, version - 1),
        Err(Error::Conflict(_))
    );
    assert_eq!(h.video(video_id).status, VideoStatus::Ready);
}

#[tokio::test]
async fn racing_reprocess_calls_only_one_wins() {
    let h = TestHarness::new();
    let video_id = h.uploaded_video(Category::Stocks).await;
    h.run_next_job().await.unwrap();
    let version = h.video(video_id).version;

    // Both callers read the same version.
    let first = h.pipeline.videos.reprocess(video_id, version);
    let second = h.pipeline.videos.reprocess(video_id, version);
    assert!(first.is_ok());
    assert_matches!(second, Err(Error::Conflict(_)));

    // Same race one level down: the guarded update itself.
    let current = h.video(video_id).version;
    assert!(videos::reset_for_reprocess(&h.conn(), video_id, current).unwrap());
    assert!(!videos::reset_for_reprocess(&h.conn(), video_id, current).unwrap());

    let queued = jobs::list_jobs_for_video(&h.conn(), video_id)
        .unwrap()
        .into_iter()
        .filter(|j| j.status == "queued")
        .count();
    assert_eq!(queued, 1);
}

#[tokio::test]
async fn reprocess_rejected_while_uploading_or_processing() {
    let h = TestHarness::new();
    let (initiated, _) = h.upload_parts("demo.mp4", 1024, Category::Stocks).await;
    let uploading = h.video(initiated.video_id);
    assert_matches!(
        h.pipeline.videos.reprocess(initiated.video_id, uploading.version),
        Err(Error::InvalidTransition {
            from: VideoStatus::Uploading,
            to: VideoStatus::Uploaded
        })
    );

    let video_id = h.uploaded_video(Category::Stocks).await;
    let job = h.pipeline.queue.dequeue("w").unwrap().unwrap();
    assert!(videos::claim_for_processing(&h.conn(), video_id, job.id).unwrap());
    let processing = h.video(video_id);
    assert_matches!(
        h.pipeline.videos.reprocess(video_id, processing.version),
        Err(Error::InvalidTransition {
            from: VideoStatus::Processing,
            ..
        })
    );

    assert_matches!(
        h.pipeline.videos.reprocess(vf_core::VideoId::new(), 1),
        Err(Error::NotFound { .. })
    );
}

#[tokio::test]
async fn archive_only_from_ready() {
    let h = TestHarness::new();
    let video_id = h.uploaded_video(Category::Stocks).await;
    assert_matches!(
        h.pipeline.videos.archive(video_id),
        Err(Error::InvalidTransition { .. })
    );

    h.run_next_job().await.unwrap();
    let archived = h.pipeline.videos.archive(video_id).unwrap();
    assert_eq!(archived.status, VideoStatus::Archived);
    assert!(archived.manifest.is_none());

    let version = archived.version;
    assert_matches!(
        h.pipeline.videos.reprocess(video_id, version),
        Err(Error::InvalidTransition { .. })
    );
}

#[tokio::test]
async fn reprocess_between_ready_and_job_completion_enqueues_a_new_job() {
    let h = TestHarness::new();
    let video_id = h.uploaded_video(Category::Psychology).await;

    // A worker has published the video but not yet closed its job.
    let job = h.pipeline.queue.dequeue("w").unwrap().unwrap();
    assert!(videos::claim_for_processing(&h.conn(), video_id, job.id).unwrap());
    let manifest = vf_core::Manifest {
        master_playlist_key: format!("psychology/{video_id}/master.m3u8"),
        variants: Vec::new(),
    };
    assert!(videos::mark_ready(&h.conn(), video_id, job.id, &manifest).unwrap());

    let version = h.video(video_id).version;
    let video = h.pipeline.videos.reprocess(video_id, version).unwrap();
    assert_eq!(video.status, VideoStatus::Uploaded);
    assert!(h.pipeline.queue.complete(job.id).unwrap());

    let next = h
        .pipeline
        .queue
        .dequeue("w")
        .unwrap()
        .expect("reprocess queued a job");
    assert_eq!(next.video_id, video_id);
    assert_ne!(next.id, job.id);
}
