//! Row mappings for the `videos`, `upload_parts` and `video_jobs` tables.
//!
//! Domain types live in `vf-core`; the functions here rebuild them from a
//! `rusqlite::Row` selected with the column lists in `queries`.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::de::DeserializeOwned;
use uuid::Uuid;
use vf_core::{
    Category, JobId, Manifest, MediaMetadata, UploadPart, UploadSession, VideoAsset, VideoId,
    VideoStatus,
};

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

fn conversion_err(
    idx: usize,
    e: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
}

/// Parse a UUID-based ID from a text column.
fn parse_id<T: From<Uuid>>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    let uuid = Uuid::parse_str(&s).map_err(|e| conversion_err(idx, e))?;
    Ok(T::from(uuid))
}

fn parse_opt_id<T: From<Uuid>>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|v| {
        Uuid::parse_str(&v)
            .map(T::from)
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

fn parse_time(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn parse_opt_time(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|v| {
        DateTime::parse_from_rfc3339(&v)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

fn parse_json<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|v| serde_json::from_str(&v).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

fn parse_enum<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let s: String = row.get(idx)?;
    s.parse::<T>()
        .map_err(|e| conversion_err(idx, e.to_string()))
}

/// Non-negative integer column read back into an unsigned field.
fn get_u64(row: &Row, idx: usize) -> rusqlite::Result<u64> {
    let v: i64 = row.get(idx)?;
    Ok(v.max(0) as u64)
}

// ---------------------------------------------------------------------------
// VideoAsset
// ---------------------------------------------------------------------------

/// Column list matching [`video_from_row`].
pub const VIDEO_COLS: &str = "id, file_name, category, status, source_bucket, source_key,
    file_size_bytes, duration_secs, media_metadata, thumbnail_key, upload_id,
    total_parts, part_size_bytes, bytes_uploaded, manifest, processing_error,
    progress, job_id, version, created_at, uploaded_at, processed_at, updated_at";

/// Build a [`VideoAsset`] from a row selected with [`VIDEO_COLS`].
///
/// The upload session is only materialised while the video is UPLOADING or
/// UPLOADED, and its `parts` are left empty; callers that need them load
/// them from `upload_parts` separately.
pub fn video_from_row(row: &Row) -> rusqlite::Result<VideoAsset> {
    let status: VideoStatus = parse_enum(row, 3)?;
    let upload_id: Option<String> = row.get(10)?;

    let upload_session = match (status, upload_id) {
        (VideoStatus::Uploading | VideoStatus::Uploaded, Some(upload_id)) => {
            Some(UploadSession {
                upload_id,
                parts: Vec::new(),
                bytes_uploaded: get_u64(row, 13)?,
                total_bytes: get_u64(row, 6)?,
                total_parts: get_u64(row, 11)? as u32,
                part_size_bytes: get_u64(row, 12)?,
            })
        }
        _ => None,
    };

    let manifest: Option<Manifest> = if status == VideoStatus::Ready {
        parse_json(row, 14)?
    } else {
        None
    };

    let processing_error: Option<String> = if status == VideoStatus::Error {
        row.get(15)?
    } else {
        None
    };

    Ok(VideoAsset {
        id: parse_id::<VideoId>(row, 0)?,
        file_name: row.get(1)?,
        category: parse_enum::<Category>(row, 2)?,
        status,
        source_bucket: row.get(4)?,
        source_key: row.get(5)?,
        file_size_bytes: get_u64(row, 6)?,
        duration_secs: row.get(7)?,
        media_metadata: parse_json::<MediaMetadata>(row, 8)?,
        thumbnail_key: row.get(9)?,
        upload_session,
        manifest,
        processing_error,
        progress: row.get(16)?,
        job_id: parse_opt_id::<JobId>(row, 17)?,
        version: row.get(18)?,
        created_at: parse_time(row, 19)?,
        uploaded_at: parse_opt_time(row, 20)?,
        processed_at: parse_opt_time(row, 21)?,
        updated_at: parse_time(row, 22)?,
    })
}

/// Build an [`UploadPart`] from `part_number, etag, size_bytes`.
pub fn part_from_row(row: &Row) -> rusqlite::Result<UploadPart> {
    Ok(UploadPart {
        part_number: get_u64(row, 0)? as u32,
        etag: row.get(1)?,
        size_bytes: get_u64(row, 2)?,
    })
}

// ---------------------------------------------------------------------------
// VideoJob
// ---------------------------------------------------------------------------

/// A row of the processing job queue.
#[derive(Debug, Clone)]
pub struct VideoJob {
    pub id: JobId,
    /// Job kind; currently always `process-video`.
    pub name: String,
    pub video_id: VideoId,
    pub source_key: String,
    pub category: Category,
    /// `queued`, `processing`, `completed` or `failed`.
    pub status: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error: Option<String>,
    pub locked_by: Option<String>,
    pub locked_at: Option<String>,
    pub scheduled_for: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl VideoJob {
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            name: row.get(1)?,
            video_id: parse_id(row, 2)?,
            source_key: row.get(3)?,
            category: parse_enum(row, 4)?,
            status: row.get(5)?,
            retry_count: get_u64(row, 6)? as u32,
            max_retries: get_u64(row, 7)? as u32,
            error: row.get(8)?,
            locked_by: row.get(9)?,
            locked_at: row.get(10)?,
            scheduled_for: row.get(11)?,
            created_at: row.get(12)?,
            started_at: row.get(13)?,
            completed_at: row.get(14)?,
        })
    }

    /// Whether another attempt is allowed after this one fails.
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
