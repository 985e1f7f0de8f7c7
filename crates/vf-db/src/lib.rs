//! vf-db: SQLite persistence for video assets and the processing job queue.
//!
//! Connection pooling goes through r2d2, the schema is embedded as ordered
//! migrations, and every status change is a single guarded `UPDATE` whose
//! `WHERE status IN (...)` clause comes from the state machine in `vf-core`.

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;

pub use pool::{get_conn, init_memory_pool, init_pool, DbPool, PooledConnection};
