//! Connection pool management for SQLite via r2d2.

use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use vf_core::{Error, Result};

use crate::migrations;

/// Type alias for the database connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Type alias for a pooled database connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Initialize a database pool backed by a file on disk.
///
/// Creates the SQLite file (and its parent directory) if missing, enables
/// foreign keys, WAL and a busy timeout on every connection, and runs
/// pending migrations.
pub fn init_pool(db_path: &Path) -> Result<DbPool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = Pool::builder()
        .max_size(8)
        .build(manager)
        .map_err(|e| Error::persistence(format!("Failed to create connection pool: {e}")))?;

    let conn = get_conn(&pool)?;
    migrations::run_migrations(&conn)?;

    tracing::debug!(path = %db_path.display(), "database pool ready");
    Ok(pool)
}

/// Initialize an in-memory database pool (useful for tests).
///
/// Each call creates a uniquely-named shared-cache in-memory database so
/// that parallel tests do not interfere with each other, while all
/// connections *within* a single pool still share state.
pub fn init_memory_pool() -> Result<DbPool> {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let uri = format!("file:vf_memdb_{}_{n}?mode=memory&cache=shared", std::process::id());

    let manager = SqliteConnectionManager::file(uri).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = Pool::builder()
        .max_size(8)
        .build(manager)
        .map_err(|e| Error::persistence(format!("Failed to create in-memory pool: {e}")))?;

    let conn = get_conn(&pool)?;
    migrations::run_migrations(&conn)?;

    Ok(pool)
}

/// Convenience helper to get a connection from the pool.
pub fn get_conn(pool: &DbPool) -> Result<PooledConnection> {
    pool.get()
        .map_err(|e| Error::persistence(format!("Failed to get connection from pool: {e}")))
}
