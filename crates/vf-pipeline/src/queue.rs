//! Durable job queue and the worker pool that drains it.
//!
//! Jobs live in the `video_jobs` table, so they survive restarts. Enqueue
//! wakes one idle worker through a [`Notify`]; idle workers also poll, which
//! picks up retries whose `scheduled_for` time has arrived.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vf_core::config::RetryConfig;
use vf_core::{Category, JobId, Result, VideoId};
use vf_db::models::VideoJob;
use vf_db::queries::jobs;
use vf_db::DbPool;

use crate::worker::TranscodeWorker;

/// Name of the only job kind the pipeline runs.
pub const PROCESS_VIDEO: &str = "process-video";

/// Payload of a `process-video` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessVideo {
    pub video_id: VideoId,
    pub source_key: String,
    pub category: Category,
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Exponential backoff for retryable processing failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `retry_count + 1`: `min(initial * 2^retry_count, max)`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(retry_count))
            .min(self.max_backoff)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_secs(config.initial_backoff_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

// ---------------------------------------------------------------------------
// JobQueue
// ---------------------------------------------------------------------------

/// Handle to the durable queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    db: DbPool,
    notify: Arc<Notify>,
    policy: RetryPolicy,
}

impl JobQueue {
    pub fn new(db: DbPool, policy: RetryPolicy) -> Self {
        Self {
            db,
            notify: Arc::new(Notify::new()),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Persist a job and wake one idle worker.
    pub fn enqueue(&self, name: &str, payload: &ProcessVideo) -> Result<VideoJob> {
        let conn = vf_db::get_conn(&self.db)?;
        let job = jobs::enqueue_job(
            &conn,
            &jobs::NewJob {
                name,
                video_id: payload.video_id,
                source_key: &payload.source_key,
                category: payload.category,
                max_retries: self.policy.max_retries,
            },
        )?;
        drop(conn);

        tracing::info!(job_id = %job.id, video_id = %job.video_id, name, "job enqueued");
        self.notify.notify_one();
        Ok(job)
    }

    /// Claim the next runnable job for `worker`.
    pub fn dequeue(&self, worker: &str) -> Result<Option<VideoJob>> {
        let conn = vf_db::get_conn(&self.db)?;
        jobs::dequeue_next(&conn, worker)
    }

    pub fn complete(&self, id: JobId) -> Result<bool> {
        let conn = vf_db::get_conn(&self.db)?;
        jobs::complete_job(&conn, id)
    }

    pub fn fail(&self, id: JobId, error: &str) -> Result<bool> {
        let conn = vf_db::get_conn(&self.db)?;
        jobs::fail_job(&conn, id, error)
    }

    /// Re-schedule a failed attempt after the policy's backoff.
    ///
    /// Returns the delay, or `None` when the job has no retries left.
    pub fn retry(&self, job: &VideoJob, error: &str) -> Result<Option<Duration>> {
        let delay = self.policy.backoff(job.retry_count);
        let conn = vf_db::get_conn(&self.db)?;
        if jobs::schedule_retry(&conn, job.id, error, delay)? {
            Ok(Some(delay))
        } else {
            Ok(None)
        }
    }

    pub fn has_queued_job(&self, video_id: VideoId) -> Result<bool> {
        let conn = vf_db::get_conn(&self.db)?;
        jobs::has_queued_job_for_video(&conn, video_id)
    }

    /// Requeue jobs a previous process left running. Call before starting workers.
    pub fn recover(&self) -> Result<usize> {
        let conn = vf_db::get_conn(&self.db)?;
        let n = jobs::reset_orphaned_jobs(&conn)?;
        if n > 0 {
            tracing::warn!(count = n, "requeued jobs interrupted by a previous shutdown");
            self.notify.notify_waiters();
        }
        Ok(n)
    }

    /// Wait until work may be available, `poll` elapses, or `cancel` fires.
    ///
    /// Returns `false` when cancelled.
    pub async fn wait_for_work(&self, poll: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = self.notify.notified() => true,
            _ = tokio::time::sleep(poll) => true,
            _ = cancel.cancelled() => false,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// A fixed set of tokio tasks consuming the queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `concurrency` workers (at least one).
    pub fn spawn(
        queue: JobQueue,
        worker: Arc<TranscodeWorker>,
        concurrency: usize,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let handles = (0..concurrency.max(1))
            .map(|n| {
                let name = format!("vf-worker-{n}");
                tokio::spawn(run_worker(
                    name,
                    queue.clone(),
                    Arc::clone(&worker),
                    poll_interval,
                    cancel.clone(),
                ))
            })
            .collect();
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit (after cancellation).
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("worker task panicked: {e}");
            }
        }
    }
}

/// One worker: dequeue, run, repeat until cancelled.
///
/// Cancellation is only observed between jobs.
async fn run_worker(
    name: String,
    queue: JobQueue,
    worker: Arc<TranscodeWorker>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(worker = %name, "worker started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match queue.dequeue(&name) {
            Ok(Some(job)) => {
                let job_id = job.id;
                if let Err(e) = worker.run(&job).await {
                    tracing::error!(worker = %name, job_id = %job_id, error = %e, "job errored");
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => tracing::error!(worker = %name, error = %e, "dequeue failed"),
        }

        if !queue.wait_for_work(poll_interval, &cancel).await {
            break;
        }
    }

    tracing::info!(worker = %name, "worker stopped");
}
