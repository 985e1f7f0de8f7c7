//! Wiring of the pipeline services around one database, object store and
//! transcoder.
//!
//! [`Pipeline`] is built once at startup and shared by the HTTP layer and the
//! worker pool. Every service holds its own clone of the pool and queue, so
//! the struct itself is cheap to wrap in an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use vf_av::Transcoder;
use vf_core::config::Config;
use vf_core::events::EventBus;
use vf_core::{Result, StorageLayout};
use vf_db::DbPool;
use vf_store::ObjectStore;

use crate::publisher::EventPublisher;
use crate::queue::{JobQueue, RetryPolicy, WorkerPool};
use crate::uploads::UploadSessionManager;
use crate::videos::VideoService;
use crate::worker::TranscodeWorker;

pub struct Pipeline {
    pub db: DbPool,
    pub store: Arc<dyn ObjectStore>,
    pub publisher: EventPublisher,
    pub queue: JobQueue,
    pub uploads: UploadSessionManager,
    pub videos: VideoService,
    pub worker: Arc<TranscodeWorker>,
    config: Arc<Config>,
}

impl Pipeline {
    /// Build the services with webhook and email delivery taken from
    /// `config.notifications`.
    pub fn new(
        config: Arc<Config>,
        db: DbPool,
        store: Arc<dyn ObjectStore>,
        transcoder: Arc<dyn Transcoder>,
        bus: Arc<EventBus>,
    ) -> Self {
        let publisher = EventPublisher::from_config(bus, &config.notifications);
        Self::with_publisher(config, db, store, transcoder, publisher)
    }

    /// Build the services around an already configured publisher.
    pub fn with_publisher(
        config: Arc<Config>,
        db: DbPool,
        store: Arc<dyn ObjectStore>,
        transcoder: Arc<dyn Transcoder>,
        publisher: EventPublisher,
    ) -> Self {
        let queue = JobQueue::new(db.clone(), RetryPolicy::from(&config.worker.retry));

        let uploads = UploadSessionManager::new(
            db.clone(),
            Arc::clone(&store),
            config.storage.clone(),
            queue.clone(),
            publisher.clone(),
        );
        let videos = VideoService::new(db.clone(), queue.clone());
        let worker = Arc::new(TranscodeWorker::new(
            db.clone(),
            Arc::clone(&store),
            transcoder,
            StorageLayout::new(config.storage.folders.clone()),
            config.transcode.clone(),
            publisher.clone(),
            queue.clone(),
        ));

        Self {
            db,
            store,
            publisher,
            queue,
            uploads,
            videos,
            worker,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Requeue jobs interrupted by a previous run, then start
    /// `worker.concurrency` workers that stop when `cancel` fires.
    pub fn start_workers(&self, cancel: CancellationToken) -> Result<WorkerPool> {
        self.queue.recover()?;

        let pool = WorkerPool::spawn(
            self.queue.clone(),
            Arc::clone(&self.worker),
            self.config.worker.concurrency,
            Duration::from_millis(self.config.worker.poll_interval_ms.max(10)),
            cancel,
        );
        tracing::info!(workers = pool.len(), "worker pool started");
        Ok(pool)
    }
}
