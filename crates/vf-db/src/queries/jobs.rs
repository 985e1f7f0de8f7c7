//! Processing job queue operations.
//!
//! Jobs move `queued -> processing -> completed | failed`. A failed attempt
//! with retry budget left goes back to `queued` with a `scheduled_for` time.

use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use vf_core::{Category, Error, JobId, Result, VideoId};

use super::{now, timestamp};
use crate::models::VideoJob;

const COLS: &str = "id, name, video_id, source_key, category, status, retry_count,
    max_retries, error, locked_by, locked_at, scheduled_for, created_at,
    started_at, completed_at";

/// Parameters of a new job.
#[derive(Debug, Clone)]
pub struct NewJob<'a> {
    pub name: &'a str,
    pub video_id: VideoId,
    pub source_key: &'a str,
    pub category: Category,
    pub max_retries: u32,
}

/// Insert a queued job, runnable immediately.
pub fn enqueue_job(conn: &Connection, job: &NewJob<'_>) -> Result<VideoJob> {
    let id = JobId::new();
    let now = now();

    conn.execute(
        "INSERT INTO video_jobs (id, name, video_id, source_key, category, status,
            max_retries, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'queued', ?6, ?7)",
        params![
            id.to_string(),
            job.name,
            job.video_id.to_string(),
            job.source_key,
            job.category.as_str(),
            i64::from(job.max_retries),
            &now
        ],
    )
    .map_err(Error::persistence)?;

    Ok(VideoJob {
        id,
        name: job.name.to_string(),
        video_id: job.video_id,
        source_key: job.source_key.to_string(),
        category: job.category,
        status: "queued".to_string(),
        retry_count: 0,
        max_retries: job.max_retries,
        error: None,
        locked_by: None,
        locked_at: None,
        scheduled_for: None,
        created_at: now,
        started_at: None,
        completed_at: None,
    })
}

/// Get a job by ID.
pub fn get_job(conn: &Connection, id: JobId) -> Result<Option<VideoJob>> {
    let q = format!("SELECT {COLS} FROM video_jobs WHERE id = ?1");
    conn.query_row(&q, [id.to_string()], VideoJob::from_row)
        .optional()
        .map_err(Error::persistence)
}

/// All jobs ever created for a video, oldest first.
pub fn list_jobs_for_video(conn: &Connection, video_id: VideoId) -> Result<Vec<VideoJob>> {
    let q = format!(
        "SELECT {COLS} FROM video_jobs WHERE video_id = ?1 ORDER BY created_at ASC, rowid ASC"
    );
    let mut stmt = conn.prepare(&q).map_err(Error::persistence)?;
    let rows = stmt
        .query_map([video_id.to_string()], VideoJob::from_row)
        .map_err(Error::persistence)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::persistence)?;
    Ok(rows)
}

/// Atomically dequeue the next runnable job.
///
/// Sets `status='processing'`, `locked_by`, `locked_at`, `started_at`. Jobs
/// whose `scheduled_for` lies in the future are skipped. A single
/// `UPDATE ... RETURNING` guarantees each job goes to exactly one worker.
pub fn dequeue_next(conn: &Connection, worker: &str) -> Result<Option<VideoJob>> {
    let now = now();

    // SQLite RETURNING is supported since 3.35.
    let q = format!(
        "UPDATE video_jobs SET status='processing', locked_by=?1, locked_at=?2, started_at=?2
         WHERE id = (
             SELECT id FROM video_jobs
             WHERE status='queued' AND (scheduled_for IS NULL OR scheduled_for <= ?2)
             ORDER BY COALESCE(scheduled_for, created_at) ASC, rowid ASC LIMIT 1
         )
         RETURNING {COLS}"
    );

    conn.query_row(&q, params![worker, &now], VideoJob::from_row)
        .optional()
        .map_err(Error::persistence)
}

/// Mark a job as completed.
pub fn complete_job(conn: &Connection, id: JobId) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE video_jobs SET status='completed', error=NULL, completed_at=?1
             WHERE id=?2 AND status='processing'",
            params![now(), id.to_string()],
        )
        .map_err(Error::persistence)?;
    Ok(n > 0)
}

/// Mark a job as failed for good.
pub fn fail_job(conn: &Connection, id: JobId, error: &str) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE video_jobs SET status='failed', error=?1, completed_at=?2 WHERE id=?3",
            params![error, now(), id.to_string()],
        )
        .map_err(Error::persistence)?;
    Ok(n > 0)
}

/// Put a job back in the queue to run after `delay`, consuming one retry.
///
/// Returns `false` when the retry budget is exhausted.
pub fn schedule_retry(conn: &Connection, id: JobId, error: &str, delay: Duration) -> Result<bool> {
    let delay = chrono::Duration::from_std(delay)
        .map_err(|e| Error::Validation(format!("retry delay out of range: {e}")))?;
    let scheduled_for = timestamp(Utc::now() + delay);

    let n = conn
        .execute(
            "UPDATE video_jobs SET status='queued', error=?1, scheduled_for=?2,
                locked_by=NULL, locked_at=NULL, started_at=NULL, completed_at=NULL,
                retry_count=retry_count+1
             WHERE id=?3 AND retry_count < max_retries",
            params![error, scheduled_for, id.to_string()],
        )
        .map_err(Error::persistence)?;
    Ok(n > 0)
}

/// Whether a video has a job waiting to be dequeued.
///
/// Running jobs do not count: a job already past its claim cannot pick the
/// video up again once it leaves PROCESSING.
pub fn has_queued_job_for_video(conn: &Connection, video_id: VideoId) -> Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM video_jobs
         WHERE video_id = ?1 AND status = 'queued'",
        [video_id.to_string()],
        |row| row.get(0),
    )
    .map_err(Error::persistence)
}

/// Return jobs left `processing` by a previous run to the queue.
///
/// Called once at startup, before any worker dequeues.
pub fn reset_orphaned_jobs(conn: &Connection) -> Result<usize> {
    conn.execute(
        "UPDATE video_jobs SET status='queued', locked_by=NULL, locked_at=NULL, started_at=NULL
         WHERE status='processing'",
        [],
    )
    .map_err(Error::persistence)
}

/// Count jobs per status, for health reporting.
pub fn count_by_status(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM video_jobs GROUP BY status ORDER BY status")
        .map_err(Error::persistence)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(Error::persistence)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::persistence)?;
    Ok(rows)
}
