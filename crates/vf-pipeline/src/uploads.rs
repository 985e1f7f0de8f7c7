//! Multipart upload lifecycle: initiate, sign part URLs, record parts,
//! complete, abort.
//!
//! The client uploads part bodies straight to the object store through
//! signed URLs; this manager only coordinates. It owns the
//! UPLOADING -> UPLOADED transition and hands completed uploads to the job
//! queue.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use vf_core::config::StorageConfig;
use vf_core::events::EventPayload;
use vf_core::{
    Category, Error, JobId, Result, StorageLayout, UploadPart, UploadSession, VideoAsset,
    VideoId, VideoStatus,
};
use vf_db::queries::videos::{self, PartProgress};
use vf_db::DbPool;
use vf_store::{content_type, CompletedPart, ObjectStore};

use crate::publisher::EventPublisher;
use crate::queue::{JobQueue, ProcessVideo, PROCESS_VIDEO};

/// S3 refuses multipart uploads with more parts than this.
pub const MAX_PARTS: u64 = 10_000;

/// Message recorded on videos whose upload the client aborted.
pub const ABORTED_MESSAGE: &str = "Upload aborted by user";

/// Result of [`UploadSessionManager::initiate`].
#[derive(Debug, Clone, Serialize)]
pub struct InitiatedUpload {
    pub video_id: VideoId,
    pub upload_id: String,
    pub source_key: String,
    pub part_size_bytes: u64,
    pub total_parts: u32,
}

/// A presigned part URL and its lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct SignedUrl {
    pub url: String,
    pub part_number: u32,
    pub expires_in_secs: u64,
}

/// Result of [`UploadSessionManager::complete_upload`].
#[derive(Debug, Clone, Serialize)]
pub struct CompletedUpload {
    pub video_id: VideoId,
    pub status: VideoStatus,
    /// Job enqueued by this call; `None` for an idempotent repeat.
    pub job_id: Option<JobId>,
    pub already_completed: bool,
}

pub struct UploadSessionManager {
    db: DbPool,
    store: Arc<dyn ObjectStore>,
    layout: StorageLayout,
    config: StorageConfig,
    queue: JobQueue,
    publisher: EventPublisher,
}

impl UploadSessionManager {
    pub fn new(
        db: DbPool,
        store: Arc<dyn ObjectStore>,
        config: StorageConfig,
        queue: JobQueue,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            db,
            store,
            layout: StorageLayout::new(config.folders.clone()),
            config,
            queue,
            publisher,
        }
    }

    fn load(&self, video_id: VideoId) -> Result<VideoAsset> {
        let conn = vf_db::get_conn(&self.db)?;
        videos::get_video(&conn, video_id)?.ok_or_else(|| Error::not_found("video", video_id))
    }

    /// The open session of an UPLOADING video, if it is `upload_id`'s.
    fn open_session(video: &VideoAsset, upload_id: &str) -> Result<UploadSession> {
        match &video.upload_session {
            Some(session)
                if video.status == VideoStatus::Uploading && session.upload_id == upload_id =>
            {
                Ok(session.clone())
            }
            _ => Err(Error::not_found("upload", upload_id)),
        }
    }

    /// The idempotent answer when `video` already moved past UPLOADING with
    /// this `upload_id`.
    fn completed_earlier(&self, video: &VideoAsset, upload_id: &str) -> Result<Option<CompletedUpload>> {
        if !matches!(
            video.status,
            VideoStatus::Uploaded | VideoStatus::Processing | VideoStatus::Ready
        ) {
            return Ok(None);
        }
        let stored = {
            let conn = vf_db::get_conn(&self.db)?;
            videos::get_upload_id(&conn, video.id)?
        };
        if stored.as_deref() != Some(upload_id) {
            return Ok(None);
        }
        tracing::debug!(video_id = %video.id, "upload already completed");
        Ok(Some(CompletedUpload {
            video_id: video.id,
            status: video.status,
            job_id: None,
            already_completed: true,
        }))
    }

    fn check_part_number(part_number: u32, total_parts: u32) -> Result<()> {
        if part_number == 0 || part_number > total_parts {
            return Err(Error::Validation(format!(
                "part number {part_number} outside 1..={total_parts}"
            )));
        }
        Ok(())
    }

    /// Start a multipart upload and create the video in UPLOADING.
    pub async fn initiate(
        &self,
        file_name: &str,
        file_size_bytes: u64,
        category: Category,
    ) -> Result<InitiatedUpload> {
        let file_name = file_name.trim();
        if file_name.is_empty() {
            return Err(Error::Validation("file_name must not be empty".into()));
        }
        if file_size_bytes == 0 {
            return Err(Error::Validation("file_size_bytes must be positive".into()));
        }

        let part_size_bytes = self.config.effective_part_size();
        let total_parts = file_size_bytes.div_ceil(part_size_bytes);
        if total_parts > MAX_PARTS {
            return Err(Error::Validation(format!(
                "file of {file_size_bytes} bytes needs {total_parts} parts of {part_size_bytes} bytes (max {MAX_PARTS})"
            )));
        }
        let total_parts = total_parts as u32;

        let video_id = VideoId::new();
        let source_key = self.layout.source_key(category, video_id, file_name);
        let upload_id = self
            .store
            .create_multipart_upload(&source_key, content_type::for_path(file_name))
            .await?;

        let now = Utc::now();
        let video = VideoAsset {
            id: video_id,
            file_name: file_name.to_string(),
            category,
            status: VideoStatus::Uploading,
            source_bucket: self.store.bucket().to_string(),
            source_key: source_key.clone(),
            file_size_bytes,
            duration_secs: None,
            media_metadata: None,
            thumbnail_key: None,
            upload_session: Some(UploadSession {
                upload_id: upload_id.clone(),
                parts: Vec::new(),
                bytes_uploaded: 0,
                total_bytes: file_size_bytes,
                total_parts,
                part_size_bytes,
            }),
            manifest: None,
            processing_error: None,
            progress: 0.0,
            job_id: None,
            version: 1,
            created_at: now,
            uploaded_at: None,
            processed_at: None,
            updated_at: now,
        };

        let inserted =
            vf_db::get_conn(&self.db).and_then(|conn| videos::insert_video(&conn, &video));
        if let Err(e) = inserted {
            // Do not leave an orphaned multipart upload behind.
            if let Err(abort_err) = self
                .store
                .abort_multipart_upload(&source_key, &upload_id)
                .await
            {
                tracing::warn!(
                    upload_id = %upload_id,
                    error = %abort_err,
                    "failed to abort orphaned upload"
                );
            }
            return Err(e);
        }

        tracing::info!(
            video_id = %video_id,
            category = %category,
            file_size_bytes,
            total_parts,
            "upload initiated"
        );
        self.publisher.emit(EventPayload::UploadInitiated {
            video_id,
            file_name: file_name.to_string(),
            category,
            total_parts,
        });

        Ok(InitiatedUpload {
            video_id,
            upload_id,
            source_key,
            part_size_bytes,
            total_parts,
        })
    }

    /// Presign a URL for one part of an open upload.
    pub async fn part_upload_url(
        &self,
        video_id: VideoId,
        upload_id: &str,
        part_number: u32,
    ) -> Result<SignedUrl> {
        let video = self.load(video_id)?;
        let session = Self::open_session(&video, upload_id)?;
        Self::check_part_number(part_number, session.total_parts)?;

        let ttl = self.config.effective_part_url_ttl();
        let url = self
            .store
            .sign_part_upload_url(&video.source_key, upload_id, part_number, ttl)
            .await?;

        Ok(SignedUrl {
            url,
            part_number,
            expires_in_secs: ttl.as_secs(),
        })
    }

    /// Record a part the client finished uploading.
    pub fn record_part(
        &self,
        video_id: VideoId,
        upload_id: &str,
        part: UploadPart,
    ) -> Result<PartProgress> {
        let video = self.load(video_id)?;
        let session = Self::open_session(&video, upload_id)?;
        Self::check_part_number(part.part_number, session.total_parts)?;
        if part.etag.trim().is_empty() {
            return Err(Error::Validation(format!(
                "part {} has an empty etag",
                part.part_number
            )));
        }

        let progress = {
            let conn = vf_db::get_conn(&self.db)?;
            videos::record_part(&conn, video_id, upload_id, &part)?
        }
        .ok_or_else(|| Error::not_found("upload", upload_id))?;

        self.publisher.emit(EventPayload::UploadProgress {
            video_id,
            parts_uploaded: progress.parts_uploaded,
            bytes_uploaded: progress.bytes_uploaded,
            total_bytes: progress.total_bytes,
        });
        Ok(progress)
    }

    /// Finish the multipart upload and queue the video for processing.
    ///
    /// Repeating a completion that already succeeded returns success without
    /// enqueueing again.
    pub async fn complete_upload(
        &self,
        video_id: VideoId,
        upload_id: &str,
        parts: Vec<UploadPart>,
    ) -> Result<CompletedUpload> {
        let video = self.load(video_id)?;
        if let Some(done) = self.completed_earlier(&video, upload_id)? {
            return Ok(done);
        }

        video.status.ensure_transition(VideoStatus::Uploaded)?;
        let session = Self::open_session(&video, upload_id)?;
        let parts = validate_parts(parts, &session, video.file_size_bytes)?;

        let completed: Vec<CompletedPart> = parts
            .iter()
            .map(|p| CompletedPart {
                part_number: p.part_number,
                etag: p.etag.clone(),
            })
            .collect();

        if let Err(e) = self
            .store
            .complete_multipart_upload(&video.source_key, upload_id, &completed)
            .await
        {
            // A concurrent completion of the same upload may have won.
            if let Some(done) = self.completed_earlier(&self.load(video_id)?, upload_id)? {
                return Ok(done);
            }
            let assembled = matches!(e, Error::NotFound { .. })
                && self.store.head_object(&video.source_key).await?.is_some();
            if !assembled {
                let message = e.to_string();
                tracing::error!(video_id = %video_id, error = %message, "multipart completion failed");
                let conn = vf_db::get_conn(&self.db)?;
                videos::mark_error(&conn, video_id, &[VideoStatus::Uploading], &message)?;
                return Err(match e {
                    Error::ExternalStorage { .. } => e,
                    other => Error::storage("complete_multipart_upload", other),
                });
            }
            tracing::info!(
                video_id = %video_id,
                "multipart upload already assembled by a concurrent completion"
            );
        }

        let marked = {
            let conn = vf_db::get_conn(&self.db)?;
            videos::mark_uploaded(&conn, video_id, upload_id, &parts)?
        };
        if !marked {
            if let Some(done) = self.completed_earlier(&self.load(video_id)?, upload_id)? {
                return Ok(done);
            }
            return Err(Error::Conflict(format!(
                "video {video_id} changed while completing its upload"
            )));
        }

        let job = self.queue.enqueue(
            PROCESS_VIDEO,
            &ProcessVideo {
                video_id,
                source_key: video.source_key.clone(),
                category: video.category,
            },
        )?;

        tracing::info!(
            video_id = %video_id,
            job_id = %job.id,
            parts = parts.len(),
            "upload completed"
        );
        self.publisher.emit(EventPayload::UploadCompleted { video_id });

        Ok(CompletedUpload {
            video_id,
            status: VideoStatus::Uploaded,
            job_id: Some(job.id),
            already_completed: false,
        })
    }

    /// Abandon an upload. Allowed while UPLOADING or UPLOADED, never once
    /// processing has begun.
    pub async fn abort_upload(&self, video_id: VideoId, upload_id: &str) -> Result<VideoAsset> {
        let video = self.load(video_id)?;
        video.status.ensure_transition(VideoStatus::Error)?;
        if video.status == VideoStatus::Processing {
            return Err(Error::InvalidTransition {
                from: video.status,
                to: VideoStatus::Error,
            });
        }

        let stored = {
            let conn = vf_db::get_conn(&self.db)?;
            videos::get_upload_id(&conn, video_id)?
        };
        if stored.as_deref() != Some(upload_id) {
            return Err(Error::not_found("upload", upload_id));
        }

        match self
            .store
            .abort_multipart_upload(&video.source_key, upload_id)
            .await
        {
            Ok(()) => {}
            Err(Error::NotFound { .. }) => {
                tracing::debug!(video_id = %video_id, upload_id, "no such upload at the store");
            }
            Err(e) => return Err(e),
        }

        let marked = {
            let conn = vf_db::get_conn(&self.db)?;
            videos::mark_error(
                &conn,
                video_id,
                &[VideoStatus::Uploading, VideoStatus::Uploaded],
                ABORTED_MESSAGE,
            )?
        };
        if !marked {
            return Err(Error::Conflict(format!(
                "video {video_id} changed while aborting its upload"
            )));
        }

        tracing::info!(video_id = %video_id, "upload aborted");
        self.publisher.emit(EventPayload::UploadAborted { video_id });
        self.load(video_id)
    }
}

/// Check a completion request against the session and return the parts
/// sorted by part number, with sizes filled in.
fn validate_parts(
    parts: Vec<UploadPart>,
    session: &UploadSession,
    file_size_bytes: u64,
) -> Result<Vec<UploadPart>> {
    if parts.is_empty() {
        return Err(Error::Validation("parts must not be empty".into()));
    }

    let mut seen = HashSet::with_capacity(parts.len());
    for part in &parts {
        UploadSessionManager::check_part_number(part.part_number, session.total_parts)?;
        if !seen.insert(part.part_number) {
            return Err(Error::Validation(format!(
                "duplicate part number {}",
                part.part_number
            )));
        }
        if part.etag.trim().is_empty() {
            return Err(Error::Validation(format!(
                "part {} has an empty etag",
                part.part_number
            )));
        }
    }
    if parts.len() != session.total_parts as usize {
        return Err(Error::Validation(format!(
            "expected {} parts, got {}",
            session.total_parts,
            parts.len()
        )));
    }

    let mut parts = parts;
    parts.sort_by_key(|p| p.part_number);
    for part in &mut parts {
        if part.size_bytes == 0 {
            part.size_bytes = expected_part_size(part.part_number, session, file_size_bytes);
        }
    }
    Ok(parts)
}

/// Size of part `n` when every part but the last is `part_size_bytes`.
fn expected_part_size(part_number: u32, session: &UploadSession, file_size_bytes: u64) -> u64 {
    let offset = u64::from(part_number - 1) * session.part_size_bytes;
    file_size_bytes
        .saturating_sub(offset)
        .min(session.part_size_bytes)
}
