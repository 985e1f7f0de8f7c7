//! Single-writer progress reporting for one processing job.
//!
//! Rung encoders report their own fraction through cheap closures; the
//! fractions are funnelled over an unbounded channel to one task that
//! computes overall progress, persists it (monotonic in SQL) and emits
//! `processing-progress` events.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use vf_core::events::EventPayload;
use vf_core::{JobId, VideoId};
use vf_db::queries::videos;
use vf_db::DbPool;

use crate::publisher::EventPublisher;

/// Smallest overall increase worth persisting and announcing.
const REPORT_STEP: f64 = 0.01;

#[derive(Debug, Clone, Copy)]
struct RungProgress {
    index: usize,
    fraction: f64,
}

/// Overall progress across `rungs.len()` renditions.
///
/// Each rung contributes its fraction divided by the rung count, so with
/// sequential encoding this is `(rung_index + rung_fraction) / rung_count`.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    fractions: Vec<f64>,
}

impl ProgressTracker {
    pub fn new(rung_count: usize) -> Self {
        Self {
            fractions: vec![0.0; rung_count],
        }
    }

    /// Record a rung fraction and return the new overall progress.
    ///
    /// A rung's fraction never decreases and out-of-range indices are ignored.
    pub fn update(&mut self, index: usize, fraction: f64) -> f64 {
        if let Some(slot) = self.fractions.get_mut(index) {
            let fraction = if fraction.is_finite() {
                fraction.clamp(0.0, 1.0)
            } else {
                0.0
            };
            *slot = slot.max(fraction);
        }
        self.overall()
    }

    pub fn overall(&self) -> f64 {
        if self.fractions.is_empty() {
            return 0.0;
        }
        self.fractions.iter().sum::<f64>() / self.fractions.len() as f64
    }
}

/// Owner of the writer task for one job.
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<RungProgress>,
    task: JoinHandle<()>,
}

impl ProgressReporter {
    /// Spawn the writer for `video_id`/`job_id` over the given rung qualities.
    pub fn spawn(
        db: DbPool,
        publisher: EventPublisher,
        video_id: VideoId,
        job_id: JobId,
        qualities: Vec<String>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<RungProgress>();

        let task = tokio::spawn(async move {
            let mut tracker = ProgressTracker::new(qualities.len());
            let mut reported = 0.0_f64;

            while let Some(update) = rx.recv().await {
                let overall = tracker.update(update.index, update.fraction);
                let rung_done = update.fraction >= 1.0;
                if overall - reported < REPORT_STEP && !(rung_done && overall > reported) {
                    continue;
                }
                reported = overall;

                let persisted = vf_db::get_conn(&db)
                    .and_then(|conn| videos::update_progress(&conn, video_id, job_id, overall));
                if let Err(e) = persisted {
                    tracing::warn!(video_id = %video_id, job_id = %job_id, error = %e, "failed to persist progress");
                }

                publisher.emit(EventPayload::ProcessingProgress {
                    video_id,
                    job_id,
                    progress: overall,
                    quality: qualities.get(update.index).cloned(),
                });
            }
        });

        Self { tx, task }
    }

    /// Callback for rung `index`; receives that rung's fraction.
    pub fn sink(&self, index: usize) -> impl Fn(f64) + Send + Sync + 'static {
        let tx = self.tx.clone();
        move |fraction| {
            // Receiver only goes away after finish().
            let _ = tx.send(RungProgress { index, fraction });
        }
    }

    /// Close the channel and wait until every queued update is written.
    pub async fn finish(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            tracing::error!("progress writer panicked: {e}");
        }
    }
}
