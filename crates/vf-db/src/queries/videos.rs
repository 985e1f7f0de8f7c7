//! Video asset persistence.
//!
//! Every status change is one `UPDATE` guarded by `status IN (...)` (derived
//! from [`VideoStatus::predecessors`]) and bumps `version`. A `false` return
//! means the guard did not match: the row is missing or another writer moved
//! it first.

use rusqlite::{params, Connection, OptionalExtension};
use vf_core::{
    Category, Error, JobId, Manifest, MediaMetadata, Result, UploadPart, VideoAsset, VideoId,
    VideoStatus,
};

use super::{now, status_list};
use crate::models::{part_from_row, video_from_row, VIDEO_COLS};

fn guard_into(to: VideoStatus) -> String {
    status_list(&VideoStatus::predecessors(to))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Internal(format!("serialize: {e}")))
}

/// Insert a freshly initiated video.
pub fn insert_video(conn: &Connection, video: &VideoAsset) -> Result<()> {
    let session = video.upload_session.as_ref();
    let media_metadata = video.media_metadata.as_ref().map(to_json).transpose()?;
    let manifest = video.manifest.as_ref().map(to_json).transpose()?;

    conn.execute(
        "INSERT INTO videos (id, file_name, category, status, source_bucket, source_key,
            file_size_bytes, duration_secs, media_metadata, thumbnail_key, upload_id,
            total_parts, part_size_bytes, bytes_uploaded, manifest, processing_error,
            progress, job_id, version, created_at, uploaded_at, processed_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
            ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
        params![
            video.id.to_string(),
            video.file_name,
            video.category.as_str(),
            video.status.as_str(),
            video.source_bucket,
            video.source_key,
            video.file_size_bytes as i64,
            video.duration_secs,
            media_metadata,
            video.thumbnail_key,
            session.map(|s| s.upload_id.as_str()),
            session.map_or(0, |s| i64::from(s.total_parts)),
            session.map_or(0, |s| s.part_size_bytes as i64),
            session.map_or(0, |s| s.bytes_uploaded as i64),
            manifest,
            video.processing_error,
            video.progress,
            video.job_id.map(|id| id.to_string()),
            video.version,
            super::timestamp(video.created_at),
            video.uploaded_at.map(super::timestamp),
            video.processed_at.map(super::timestamp),
            super::timestamp(video.updated_at),
        ],
    )
    .map_err(Error::persistence)?;
    Ok(())
}

/// Get a video by ID, with its recorded parts when an upload session is open.
pub fn get_video(conn: &Connection, id: VideoId) -> Result<Option<VideoAsset>> {
    let q = format!("SELECT {VIDEO_COLS} FROM videos WHERE id = ?1");
    let video = conn
        .query_row(&q, [id.to_string()], video_from_row)
        .optional()
        .map_err(Error::persistence)?;

    match video {
        Some(mut video) => {
            if let Some(session) = video.upload_session.as_mut() {
                session.parts = list_parts(conn, id)?;
            }
            Ok(Some(video))
        }
        None => Ok(None),
    }
}

/// Filter for [`list_videos`] and [`count_videos`].
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoFilter {
    pub status: Option<VideoStatus>,
    pub category: Option<Category>,
}

impl VideoFilter {
    fn where_clause(&self) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(status) = self.status {
            values.push(status.as_str().to_string());
            clauses.push(format!("status = ?{}", values.len()));
        }
        if let Some(category) = self.category {
            values.push(category.as_str().to_string());
            clauses.push(format!("category = ?{}", values.len()));
        }
        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!("WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

/// List videos, newest first. Upload parts are not loaded.
pub fn list_videos(
    conn: &Connection,
    filter: VideoFilter,
    offset: i64,
    limit: i64,
) -> Result<Vec<VideoAsset>> {
    let (where_clause, values) = filter.where_clause();
    let n = values.len();
    let q = format!(
        "SELECT {VIDEO_COLS} FROM videos {where_clause}
         ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
        n + 1,
        n + 2
    );

    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = values
        .into_iter()
        .map(|v| Box::new(v) as Box<dyn rusqlite::types::ToSql>)
        .collect();
    params_vec.push(Box::new(limit));
    params_vec.push(Box::new(offset));
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn.prepare(&q).map_err(Error::persistence)?;
    let rows = stmt
        .query_map(params_refs.as_slice(), video_from_row)
        .map_err(Error::persistence)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::persistence)?;
    Ok(rows)
}

pub fn count_videos(conn: &Connection, filter: VideoFilter) -> Result<i64> {
    let (where_clause, values) = filter.where_clause();
    let q = format!("SELECT COUNT(*) FROM videos {where_clause}");
    conn.query_row(&q, rusqlite::params_from_iter(values), |row| row.get(0))
        .map_err(Error::persistence)
}

/// The multipart upload id a video was created with.
///
/// Unlike [`VideoAsset::upload_session`] this survives the move past
/// UPLOADED, which completion idempotence relies on.
pub fn get_upload_id(conn: &Connection, id: VideoId) -> Result<Option<String>> {
    conn.query_row(
        "SELECT upload_id FROM videos WHERE id = ?1",
        [id.to_string()],
        |row| row.get::<_, Option<String>>(0),
    )
    .optional()
    .map(Option::flatten)
    .map_err(Error::persistence)
}

/// Recorded parts of a video's upload, sorted by part number.
pub fn list_parts(conn: &Connection, id: VideoId) -> Result<Vec<UploadPart>> {
    let mut stmt = conn
        .prepare(
            "SELECT part_number, etag, size_bytes FROM upload_parts
             WHERE video_id = ?1 ORDER BY part_number ASC",
        )
        .map_err(Error::persistence)?;
    let rows = stmt
        .query_map([id.to_string()], part_from_row)
        .map_err(Error::persistence)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::persistence)?;
    Ok(rows)
}

/// Upload totals after [`record_part`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartProgress {
    pub parts_uploaded: u32,
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
}

/// Upsert one uploaded part and recompute `bytes_uploaded`.
///
/// Only applies while the video is UPLOADING under `upload_id`; returns
/// `None` otherwise.
pub fn record_part(
    conn: &Connection,
    id: VideoId,
    upload_id: &str,
    part: &UploadPart,
) -> Result<Option<PartProgress>> {
    let tx = conn.unchecked_transaction().map_err(Error::persistence)?;
    let now = now();

    let open: bool = tx
        .query_row(
            "SELECT COUNT(*) > 0 FROM videos
             WHERE id = ?1 AND upload_id = ?2 AND status = ?3",
            params![id.to_string(), upload_id, VideoStatus::Uploading.as_str()],
            |row| row.get(0),
        )
        .map_err(Error::persistence)?;
    if !open {
        return Ok(None);
    }

    tx.execute(
        "INSERT INTO upload_parts (video_id, part_number, etag, size_bytes, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(video_id, part_number) DO UPDATE SET
            etag = excluded.etag,
            size_bytes = excluded.size_bytes,
            recorded_at = excluded.recorded_at",
        params![
            id.to_string(),
            i64::from(part.part_number),
            part.etag,
            part.size_bytes as i64,
            &now
        ],
    )
    .map_err(Error::persistence)?;

    tx.execute(
        "UPDATE videos SET
            bytes_uploaded = (SELECT COALESCE(SUM(size_bytes), 0)
                              FROM upload_parts WHERE video_id = ?1),
            updated_at = ?2
         WHERE id = ?1",
        params![id.to_string(), &now],
    )
    .map_err(Error::persistence)?;

    let progress = tx
        .query_row(
            "SELECT v.bytes_uploaded, v.file_size_bytes,
                (SELECT COUNT(*) FROM upload_parts p WHERE p.video_id = v.id)
             FROM videos v WHERE v.id = ?1",
            [id.to_string()],
            |row| {
                Ok(PartProgress {
                    bytes_uploaded: row.get::<_, i64>(0)?.max(0) as u64,
                    total_bytes: row.get::<_, i64>(1)?.max(0) as u64,
                    parts_uploaded: row.get::<_, i64>(2)?.max(0) as u32,
                })
            },
        )
        .map_err(Error::persistence)?;

    tx.commit().map_err(Error::persistence)?;
    Ok(Some(progress))
}

/// UPLOADING -> UPLOADED for the session `upload_id`, replacing the recorded
/// parts with the completed list.
pub fn mark_uploaded(
    conn: &Connection,
    id: VideoId,
    upload_id: &str,
    parts: &[UploadPart],
) -> Result<bool> {
    let tx = conn.unchecked_transaction().map_err(Error::persistence)?;
    let now = now();

    let q = format!(
        "UPDATE videos SET status = ?1, bytes_uploaded = file_size_bytes, uploaded_at = ?2,
            updated_at = ?2, version = version + 1
         WHERE id = ?3 AND upload_id = ?4 AND status IN ({})",
        guard_into(VideoStatus::Uploaded)
    );
    let n = tx
        .execute(
            &q,
            params![VideoStatus::Uploaded.as_str(), &now, id.to_string(), upload_id],
        )
        .map_err(Error::persistence)?;
    if n == 0 {
        return Ok(false);
    }

    tx.execute("DELETE FROM upload_parts WHERE video_id = ?1", [id.to_string()])
        .map_err(Error::persistence)?;
    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO upload_parts (video_id, part_number, etag, size_bytes, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(Error::persistence)?;
        for part in parts {
            stmt.execute(params![
                id.to_string(),
                i64::from(part.part_number),
                part.etag,
                part.size_bytes as i64,
                &now
            ])
            .map_err(Error::persistence)?;
        }
    }

    tx.commit().map_err(Error::persistence)?;
    Ok(true)
}

/// Move a video to ERROR from any of `from` (restricted to statuses that may
/// legally enter ERROR), recording `message` and dropping the manifest.
pub fn mark_error(
    conn: &Connection,
    id: VideoId,
    from: &[VideoStatus],
    message: &str,
) -> Result<bool> {
    let allowed: Vec<VideoStatus> = from
        .iter()
        .copied()
        .filter(|s| s.can_transition_to(VideoStatus::Error))
        .collect();
    if allowed.is_empty() {
        return Ok(false);
    }

    let q = format!(
        "UPDATE videos SET status = ?1, processing_error = ?2, manifest = NULL,
            updated_at = ?3, version = version + 1
         WHERE id = ?4 AND status IN ({})",
        status_list(&allowed)
    );
    let n = conn
        .execute(
            &q,
            params![VideoStatus::Error.as_str(), message, now(), id.to_string()],
        )
        .map_err(Error::persistence)?;
    Ok(n > 0)
}

/// UPLOADED -> PROCESSING for `job_id`.
///
/// Clears upload-part bookkeeping, progress and any previous output. A video
/// already PROCESSING under the same `job_id` (a job resumed after a restart)
/// is claimed again without a version bump.
pub fn claim_for_processing(conn: &Connection, id: VideoId, job_id: JobId) -> Result<bool> {
    let tx = conn.unchecked_transaction().map_err(Error::persistence)?;

    let q = format!(
        "UPDATE videos SET
            version = CASE WHEN status = ?1 THEN version ELSE version + 1 END,
            status = ?1, job_id = ?2, progress = 0, bytes_uploaded = 0,
            manifest = NULL, processing_error = NULL, processed_at = NULL, updated_at = ?3
         WHERE id = ?4 AND (status IN ({}) OR (status = ?1 AND job_id = ?2))",
        guard_into(VideoStatus::Processing)
    );
    let n = tx
        .execute(
            &q,
            params![
                VideoStatus::Processing.as_str(),
                job_id.to_string(),
                now(),
                id.to_string()
            ],
        )
        .map_err(Error::persistence)?;
    if n == 0 {
        return Ok(false);
    }

    tx.execute("DELETE FROM upload_parts WHERE video_id = ?1", [id.to_string()])
        .map_err(Error::persistence)?;
    tx.commit().map_err(Error::persistence)?;
    Ok(true)
}

/// Update one column of a video that `job_id` is currently processing.
fn processing_update(
    conn: &Connection,
    set: &str,
    id: VideoId,
    job_id: JobId,
    value: &dyn rusqlite::types::ToSql,
) -> Result<bool> {
    let q = format!(
        "UPDATE videos SET {set}, updated_at = ?2
         WHERE id = ?3 AND job_id = ?4 AND status = '{}'",
        VideoStatus::Processing.as_str()
    );
    let n = conn
        .execute(&q, params![value, now(), id.to_string(), job_id.to_string()])
        .map_err(Error::persistence)?;
    Ok(n > 0)
}

/// Persist probe results for a video being processed by `job_id`.
pub fn set_media_info(
    conn: &Connection,
    id: VideoId,
    job_id: JobId,
    duration_secs: f64,
    metadata: &MediaMetadata,
) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE videos SET duration_secs = ?1, media_metadata = ?2, updated_at = ?3
             WHERE id = ?4 AND job_id = ?5 AND status = ?6",
            params![
                duration_secs,
                to_json(metadata)?,
                now(),
                id.to_string(),
                job_id.to_string(),
                VideoStatus::Processing.as_str()
            ],
        )
        .map_err(Error::persistence)?;
    Ok(n > 0)
}

pub fn set_thumbnail_key(
    conn: &Connection,
    id: VideoId,
    job_id: JobId,
    key: &str,
) -> Result<bool> {
    processing_update(conn, "thumbnail_key = ?1", id, job_id, &key)
}

/// Raise processing progress; never lowers it.
pub fn update_progress(
    conn: &Connection,
    id: VideoId,
    job_id: JobId,
    progress: f64,
) -> Result<bool> {
    let progress = progress.clamp(0.0, 1.0);
    processing_update(conn, "progress = MAX(progress, ?1)", id, job_id, &progress)
}

/// PROCESSING -> READY with the published manifest.
pub fn mark_ready(
    conn: &Connection,
    id: VideoId,
    job_id: JobId,
    manifest: &Manifest,
) -> Result<bool> {
    let q = format!(
        "UPDATE videos SET status = ?1, manifest = ?2, progress = 1.0, processing_error = NULL,
            processed_at = ?3, updated_at = ?3, version = version + 1
         WHERE id = ?4 AND job_id = ?5 AND status IN ({})",
        guard_into(VideoStatus::Ready)
    );
    let n = conn
        .execute(
            &q,
            params![
                VideoStatus::Ready.as_str(),
                to_json(manifest)?,
                now(),
                id.to_string(),
                job_id.to_string()
            ],
        )
        .map_err(Error::persistence)?;
    Ok(n > 0)
}

/// PROCESSING -> ERROR for the run owned by `job_id`.
pub fn fail_processing(
    conn: &Connection,
    id: VideoId,
    job_id: JobId,
    message: &str,
) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE videos SET status = ?1, processing_error = ?2, manifest = NULL,
                updated_at = ?3, version = version + 1
             WHERE id = ?4 AND job_id = ?5 AND status = ?6",
            params![
                VideoStatus::Error.as_str(),
                message,
                now(),
                id.to_string(),
                job_id.to_string(),
                VideoStatus::Processing.as_str()
            ],
        )
        .map_err(Error::persistence)?;
    Ok(n > 0)
}

/// Reset a reprocessable video to UPLOADED if its version still equals
/// `expected_version`.
pub fn reset_for_reprocess(
    conn: &Connection,
    id: VideoId,
    expected_version: i64,
) -> Result<bool> {
    let q = format!(
        "UPDATE videos SET status = ?1, manifest = NULL, processing_error = NULL, progress = 0,
            processed_at = NULL, updated_at = ?2, version = version + 1
         WHERE id = ?3 AND version = ?4 AND status IN ({})",
        status_list(&VideoStatus::REPROCESSABLE)
    );
    let n = conn
        .execute(
            &q,
            params![
                VideoStatus::Uploaded.as_str(),
                now(),
                id.to_string(),
                expected_version
            ],
        )
        .map_err(Error::persistence)?;
    Ok(n > 0)
}

/// READY -> ARCHIVED.
pub fn archive_video(conn: &Connection, id: VideoId) -> Result<bool> {
    let q = format!(
        "UPDATE videos SET status = ?1, updated_at = ?2, version = version + 1
         WHERE id = ?3 AND status IN ({})",
        guard_into(VideoStatus::Archived)
    );
    let n = conn
        .execute(
            &q,
            params![VideoStatus::Archived.as_str(), now(), id.to_string()],
        )
        .map_err(Error::persistence)?;
    Ok(n > 0)
}
