//! # vf-pipeline
//!
//! The video ingest pipeline built on top of the storage, database and
//! transcoding crates.
//!
//! This crate provides:
//!
//! - **[`UploadSessionManager`]** -- multipart upload lifecycle up to
//!   UPLOADED and the hand-off to the queue.
//! - **[`JobQueue`]** / **[`WorkerPool`]** -- durable SQLite-backed queue with
//!   exponential retry, drained by a fixed pool of tokio tasks.
//! - **[`TranscodeWorker`]** -- one job from download to published ladder.
//! - **[`ProgressReporter`]** -- single-writer progress persistence.
//! - **[`EventPublisher`]** -- event bus plus webhook and email delivery.
//! - **[`VideoService`]** -- reads, reprocess and archive.
//! - **[`Pipeline`]** -- wires all of the above together.

pub mod context;
pub mod progress;
pub mod publisher;
pub mod queue;
pub mod uploads;
pub mod videos;
pub mod worker;

pub use context::Pipeline;
pub use progress::{ProgressReporter, ProgressTracker};
pub use publisher::{
    EmailSender, EventPublisher, HttpEmailRelay, NotificationSink, WebhookSink,
};
pub use queue::{JobQueue, ProcessVideo, RetryPolicy, WorkerPool, PROCESS_VIDEO};
pub use uploads::{
    CompletedUpload, InitiatedUpload, SignedUrl, UploadSessionManager, ABORTED_MESSAGE, MAX_PARTS,
};
pub use videos::{VideoPage, VideoService};
pub use worker::{JobOutcome, TranscodeWorker};
