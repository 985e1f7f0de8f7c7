//! Multipart upload lifecycle through the upload session manager.

mod common;

use assert_matches::assert_matches;
use common::TestHarness;
use vf_core::{Category, Error, UploadPart, VideoStatus};
use vf_db::queries::jobs;

#[tokio::test]
async fn initiate_creates_uploading_video_and_store_upload() {
    let h = TestHarness::new();
    let initiated = h
        .pipeline
        .uploads
        .initiate("lesson one.mp4", 250 * 1024 * 1024, Category::MasterClasses)
        .await
        .unwrap();

    assert_eq!(initiated.total_parts, 3);
    assert_eq!(initiated.part_size_bytes, 100 * 1024 * 1024);
    assert!(initiated
        .source_key
        .starts_with(&format!("master-classes/{}/source/", initiated.video_id)));
    assert_eq!(h.store.pending_uploads(), 1);

    let video = h.video(initiated.video_id);
    assert_eq!(video.status, VideoStatus::Uploading);
    assert_eq!(video.source_bucket, "test-bucket");
    assert_eq!(video.version, 1);
    let session = video.upload_session.expect("session while uploading");
    assert_eq!(session.upload_id, initiated.upload_id);
    assert!(session.parts.is_empty());
    assert_eq!(session.total_bytes, 250 * 1024 * 1024);

    assert_eq!(h.event_names(initiated.video_id), vec!["upload-initiated"]);
}

#[tokio::test]
async fn initiate_rejects_bad_input() {
    let h = TestHarness::new();
    let uploads = &h.pipeline.uploads;

    assert_matches!(
        uploads.initiate("  ", 10, Category::Stocks).await,
        Err(Error::Validation(_))
    );
    assert_matches!(
        uploads.initiate("a.mp4", 0, Category::Stocks).await,
        Err(Error::Validation(_))
    );
    // 10,001 parts of 5 GiB is more than S3 allows.
    assert_matches!(
        uploads
            .initiate("huge.mp4", 10_001 * 5 * 1024 * 1024 * 1024, Category::Stocks)
            .await,
        Err(Error::Validation(_))
    );
    assert_eq!(h.store.pending_uploads(), 0);
}

#[tokio::test]
async fn store_failure_on_initiate_creates_nothing() {
    let h = TestHarness::new();
    h.store.fail_next("create_multipart_upload");

    let err = h
        .pipeline
        .uploads
        .initiate("demo.mp4", 1024, Category::Stocks)
        .await
        .unwrap_err();
    assert_matches!(err, Error::ExternalStorage { .. });

    let page = h.pipeline.videos.list(Default::default(), 0, 10).unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn signed_part_urls_are_bounded_to_the_session() {
    let h = TestHarness::new();
    let initiated = h
        .pipeline
        .uploads
        .initiate("demo.mp4", 150 * 1024 * 1024, Category::Psychology)
        .await
        .unwrap();
    let uploads = &h.pipeline.uploads;

    let signed = uploads
        .part_upload_url(initiated.video_id, &initiated.upload_id, 2)
        .await
        .unwrap();
    assert_eq!(signed.part_number, 2);
    assert_eq!(signed.expires_in_secs, 3600);
    assert!(signed.url.contains("partNumber=2"));

    assert_matches!(
        uploads
            .part_upload_url(initiated.video_id, &initiated.upload_id, 3)
            .await,
        Err(Error::Validation(_))
    );
    assert_matches!(
        uploads
            .part_upload_url(initiated.video_id, "someone-elses-upload", 1)
            .await,
        Err(Error::NotFound { .. })
    );
}

#[tokio::test]
async fn recording_parts_tracks_bytes_and_replaces_retries() {
    let h = TestHarness::new();
    let initiated = h
        .pipeline
        .uploads
        .initiate("demo.mp4", 150 * 1024 * 1024, Category::Stocks)
        .await
        .unwrap();
    let uploads = &h.pipeline.uploads;
    let part = |n: u32, etag: &str, size: u64| UploadPart {
        part_number: n,
        etag: etag.into(),
        size_bytes: size,
    };

    let p = uploads
        .record_part(initiated.video_id, &initiated.upload_id, part(2, "\"b\"", 50))
        .unwrap();
    assert_eq!((p.parts_uploaded, p.bytes_uploaded), (1, 50));

    uploads
        .record_part(initiated.video_id, &initiated.upload_id, part(1, "\"a\"", 100))
        .unwrap();
    // Re-uploading a part replaces it.
    let p = uploads
        .record_part(initiated.video_id, &initiated.upload_id, part(1, "\"a2\"", 100))
        .unwrap();
    assert_eq!(p.parts_uploaded, 2);
    assert_eq!(p.bytes_uploaded, 150);
    assert_eq!(p.total_bytes, 150 * 1024 * 1024);

    let session = h.video(initiated.video_id).upload_session.unwrap();
    let numbers: Vec<u32> = session.parts.iter().map(|p| p.part_number).collect();
    assert_eq!(numbers, vec![1, 2]);
    assert_eq!(session.parts[0].etag, "\"a2\"");

    assert_matches!(
        uploads.record_part(initiated.video_id, &initiated.upload_id, part(1, " ", 1)),
        Err(Error::Validation(_))
    );
}

#[tokio::test]
async fn complete_moves_to_uploaded_and_enqueues_once() {
    let h = TestHarness::new();
    let (initiated, parts) = h
        .upload_parts("demo.mp4", 150 * 1024 * 1024, Category::DailyClasses)
        .await;

    // Parts may arrive in any order.
    let mut reversed = parts.clone();
    reversed.reverse();
    let first = h
        .pipeline
        .uploads
        .complete_upload(initiated.video_id, &initiated.upload_id, reversed)
        .await
        .unwrap();
    assert_eq!(first.status, VideoStatus::Uploaded);
    assert!(!first.already_completed);
    assert!(first.job_id.is_some());

    let video = h.video(initiated.video_id);
    assert_eq!(video.status, VideoStatus::Uploaded);
    assert!(video.uploaded_at.is_some());
    assert_eq!(video.version, 2);
    assert_eq!(
        h.store.object(&initiated.source_key).unwrap().as_ref(),
        b"part-1part-2"
    );

    // Completing again is a no-op success.
    let second = h
        .pipeline
        .uploads
        .complete_upload(initiated.video_id, &initiated.upload_id, parts)
        .await
        .unwrap();
    assert!(second.already_completed);
    assert_eq!(second.job_id, None);
    assert_eq!(h.store.call_count("complete_multipart_upload"), 1);

    let jobs = jobs::list_jobs_for_video(&h.conn(), initiated.video_id).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, "queued");
    assert_eq!(jobs[0].name, "process-video");

    assert_eq!(
        h.event_names(initiated.video_id),
        vec![
            "upload-initiated",
            "upload-progress",
            "upload-progress",
            "upload-completed"
        ]
    );
}

#[tokio::test]
async fn complete_with_wrong_parts_is_rejected_without_state_change() {
    let h = TestHarness::new();
    let (initiated, parts) = h
        .upload_parts("demo.mp4", 150 * 1024 * 1024, Category::Stocks)
        .await;

    let err = h
        .pipeline
        .uploads
        .complete_upload(initiated.video_id, &initiated.upload_id, parts[..1].to_vec())
        .await
        .unwrap_err();
    assert_matches!(err, Error::Validation(_));
    assert_eq!(h.video(initiated.video_id).status, VideoStatus::Uploading);

    let err = h
        .pipeline
        .uploads
        .complete_upload(initiated.video_id, "other-upload", parts)
        .await
        .unwrap_err();
    assert_matches!(err, Error::NotFound { .. });
}

#[tokio::test]
async fn store_refusing_completion_marks_error() {
    let h = TestHarness::new();
    let (initiated, mut parts) = h.upload_parts("demo.mp4", 1024, Category::Stocks).await;
    parts[0].etag = "\"not-the-real-etag\"".into();

    let err = h
        .pipeline
        .uploads
        .complete_upload(initiated.video_id, &initiated.upload_id, parts)
        .await
        .unwrap_err();
    assert_matches!(err, Error::ExternalStorage { .. });

    let video = h.video(initiated.video_id);
    assert_eq!(video.status, VideoStatus::Error);
    assert!(video.processing_error.unwrap().contains("InvalidPart"));
    assert!(!h.pipeline.queue.has_queued_job(initiated.video_id).unwrap());
}

#[tokio::test]
async fn abort_marks_error_and_discards_store_upload() {
    let h = TestHarness::new();
    let (initiated, _) = h.upload_parts("demo.mp4", 1024, Category::Stocks).await;

    let video = h
        .pipeline
        .uploads
        .abort_upload(initiated.video_id, &initiated.upload_id)
        .await
        .unwrap();
    assert_eq!(video.status, VideoStatus::Error);
    assert_eq!(
        video.processing_error.as_deref(),
        Some(vf_pipeline::ABORTED_MESSAGE)
    );
    assert!(video.upload_session.is_none());
    assert_eq!(h.store.pending_uploads(), 0);
    assert_eq!(
        h.event_names(initiated.video_id).last(),
        Some(&"upload-aborted")
    );

    // ERROR -> ERROR is not a transition.
    assert_matches!(
        h.pipeline
            .uploads
            .abort_upload(initiated.video_id, &initiated.upload_id)
            .await,
        Err(Error::InvalidTransition { .. })
    );
}

#[tokio::test]
async fn abort_tolerates_upload_already_gone_at_the_store() {
    let h = TestHarness::new();
    let (initiated, _) = h.upload_parts("demo.mp4", 1024, Category::Stocks).await;
    vf_store::ObjectStore::abort_multipart_upload(
        h.store.as_ref(),
        &initiated.source_key,
        &initiated.upload_id,
    )
    .await
    .unwrap();

    let video = h
        .pipeline
        .uploads
        .abort_upload(initiated.video_id, &initiated.upload_id)
        .await
        .unwrap();
    assert_eq!(video.status, VideoStatus::Error);
}

#[tokio::test]
async fn abort_is_refused_once_processing_started() {
    let h = TestHarness::new();
    let video_id = h.uploaded_video(Category::Stocks).await;
    let upload_id = vf_db::queries::videos::get_upload_id(&h.conn(), video_id)
        .unwrap()
        .unwrap();

    let job = h.pipeline.queue.dequeue("w").unwrap().unwrap();
    assert!(vf_db::queries::videos::claim_for_processing(&h.conn(), video_id, job.id).unwrap());

    assert_matches!(
        h.pipeline.uploads.abort_upload(video_id, &upload_id).await,
        Err(Error::InvalidTransition {
            from: VideoStatus::Processing,
            to: VideoStatus::Error
        })
    );
}

fn completed_parts(parts: &[UploadPart]) -> Vec<vf_store::CompletedPart> {
    parts
        .iter()
        .map(|p| vf_store::CompletedPart {
            part_number: p.part_number,
            etag: p.etag.clone(),
        })
        .collect()
}

#[tokio::test]
async fn completion_racing_an_earlier_store_completion_still_succeeds() {
    use vf_store::ObjectStore;

    let h = TestHarness::new();
    let (initiated, parts) = h
        .upload_parts("demo.mp4", 1024, Category::Psychology)
        .await;

    // Another completion assembled the object but has not recorded it yet.
    h.store
        .complete_multipart_upload(
            &initiated.source_key,
            &initiated.upload_id,
            &completed_parts(&parts),
        )
        .await
        .unwrap();

    let completed = h
        .pipeline
        .uploads
        .complete_upload(initiated.video_id, &initiated.upload_id, parts.clone())
        .await
        .unwrap();
    assert!(!completed.already_completed);
    assert!(completed.job_id.is_some());

    let video = h.video(initiated.video_id);
    assert_eq!(video.status, VideoStatus::Uploaded);
    assert!(video.processing_error.is_none());

    // The slower caller then gets the idempotent answer.
    let again = h
        .pipeline
        .uploads
        .complete_upload(initiated.video_id, &initiated.upload_id, parts)
        .await
        .unwrap();
    assert!(again.already_completed);
    assert_eq!(
        jobs::list_jobs_for_video(&h.conn(), initiated.video_id)
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn completion_of_vanished_upload_without_object_is_an_error() {
    use vf_store::ObjectStore;

    let h = TestHarness::new();
    let (initiated, parts) = h
        .upload_parts("demo.mp4", 1024, Category::Psychology)
        .await;
    h.store
        .abort_multipart_upload(&initiated.source_key, &initiated.upload_id)
        .await
        .unwrap();

    let err = h
        .pipeline
        .uploads
        .complete_upload(initiated.video_id, &initiated.upload_id, parts)
        .await
        .unwrap_err();
    assert_matches!(err, Error::ExternalStorage { .. });

    let video = h.video(initiated.video_id);
    assert_eq!(video.status, VideoStatus::Error);
    assert!(video.processing_error.is_some());
    assert!(!h.pipeline.queue.has_queued_job(initiated.video_id).unwrap());
}
