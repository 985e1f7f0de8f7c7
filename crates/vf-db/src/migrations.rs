//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order. A
//! `schema_migrations` table tracks which versions have been applied.

use rusqlite::Connection;
use vf_core::{Error, Result};

/// V1: videos, their upload parts, and the processing job queue.
const V1_INITIAL: &str = r#"
CREATE TABLE videos (
    id               TEXT PRIMARY KEY,
    file_name        TEXT NOT NULL,
    category         TEXT NOT NULL,
    status           TEXT NOT NULL,
    source_bucket    TEXT NOT NULL,
    source_key       TEXT NOT NULL,
    file_size_bytes  INTEGER NOT NULL,
    duration_secs    REAL,
    media_metadata   TEXT,
    thumbnail_key    TEXT,
    upload_id        TEXT,
    total_parts      INTEGER NOT NULL DEFAULT 0,
    part_size_bytes  INTEGER NOT NULL DEFAULT 0,
    bytes_uploaded   INTEGER NOT NULL DEFAULT 0,
    manifest         TEXT,
    processing_error TEXT,
    progress         REAL NOT NULL DEFAULT 0,
    job_id           TEXT,
    version          INTEGER NOT NULL DEFAULT 1,
    created_at       TEXT NOT NULL,
    uploaded_at      TEXT,
    processed_at     TEXT,
    updated_at       TEXT NOT NULL
);

CREATE INDEX idx_videos_status ON videos(status);
CREATE INDEX idx_videos_category ON videos(category);

CREATE TABLE upload_parts (
    video_id    TEXT NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
    part_number INTEGER NOT NULL,
    etag        TEXT NOT NULL,
    size_bytes  INTEGER NOT NULL DEFAULT 0,
    recorded_at TEXT NOT NULL,
    PRIMARY KEY (video_id, part_number)
);

CREATE TABLE video_jobs (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    video_id      TEXT NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
    source_key    TEXT NOT NULL,
    category      TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'queued',
    retry_count   INTEGER NOT NULL DEFAULT 0,
    max_retries   INTEGER NOT NULL DEFAULT 0,
    error         TEXT,
    locked_by     TEXT,
    locked_at     TEXT,
    scheduled_for TEXT,
    created_at    TEXT NOT NULL,
    started_at    TEXT,
    completed_at  TEXT
);

CREATE INDEX idx_video_jobs_status ON video_jobs(status, scheduled_for);
CREATE INDEX idx_video_jobs_video ON video_jobs(video_id);
"#;

/// All migrations in order.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_INITIAL)];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::persistence(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(Error::persistence)?;

        if already {
            continue;
        }

        let tx = conn.unchecked_transaction().map_err(Error::persistence)?;

        tx.execute_batch(sql)
            .map_err(|e| Error::persistence(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(Error::persistence)?;

        tx.commit().map_err(Error::persistence)?;
        tracing::info!(version, "applied database migration");
    }

    Ok(())
}
