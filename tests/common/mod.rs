//! Shared test harness for integration tests.
//!
//! [`TestHarness`] builds the full pipeline on an in-memory database, a
//! [`MemoryObjectStore`] and a [`StubTranscoder`] that writes small but
//! well-formed HLS output instead of running ffmpeg.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use tempfile::TempDir;

use vf_av::{ProbedMedia, ProgressFn, ToolRegistry, Transcoder};
use vf_core::config::Config;
use vf_core::events::{Event, EventBus};
use vf_core::{Category, Error, MediaMetadata, QualityRung, UploadPart, VideoAsset, VideoId};
use vf_db::{DbPool, PooledConnection};
use vf_pipeline::{InitiatedUpload, JobOutcome, Pipeline};
use vf_server::context::AppContext;
use vf_store::MemoryObjectStore;

pub const SEGMENTS_PER_RUNG: usize = 3;
pub const PROBED_DURATION_SECS: f64 = 30.0;

// ---------------------------------------------------------------------------
// StubTranscoder
// ---------------------------------------------------------------------------

/// Transcoder double. Each rung gets `SEGMENTS_PER_RUNG` segments and an
/// `index.m3u8` listing them.
#[derive(Default)]
pub struct StubTranscoder {
    /// Quality whose encode fails.
    fail_quality: Option<&'static str>,
    /// How many encodes of `fail_quality` fail before it starts succeeding.
    failures_left: AtomicUsize,
    /// Leave this segment out of every rung directory.
    drop_segment: Option<String>,
    encodes: AtomicUsize,
}

impl StubTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every encode of rung `index` (0-based, ladder order).
    pub fn fail_on_rung(index: usize) -> Self {
        Self::fail_on_rung_times(index, usize::MAX)
    }

    /// Fail the first `times` encodes of rung `index`.
    pub fn fail_on_rung_times(index: usize, times: usize) -> Self {
        Self {
            fail_quality: Some(vf_core::QUALITY_LADDER[index].quality),
            failures_left: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    /// List a segment in the playlist without writing the file.
    pub fn missing_segment(name: &str) -> Self {
        Self {
            drop_segment: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn encode_count(&self) -> usize {
        self.encodes.load(Ordering::SeqCst)
    }

    fn should_fail(&self, quality: &str) -> bool {
        if self.fail_quality != Some(quality) {
            return false;
        }
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Transcoder for StubTranscoder {
    async fn probe(&self, input: &Path) -> vf_core::Result<ProbedMedia> {
        assert!(input.exists(), "source was not downloaded");
        Ok(ProbedMedia {
            duration_secs: PROBED_DURATION_SECS,
            metadata: MediaMetadata {
                width: 1920,
                height: 1080,
                fps: 30.0,
                codec: "h264".into(),
                bitrate: 6_000_000,
            },
        })
    }

    async fn extract_thumbnail(
        &self,
        _input: &Path,
        _at_secs: f64,
        output: &Path,
    ) -> vf_core::Result<()> {
        tokio::fs::write(output, b"\xFF\xD8\xFFthumbnail").await?;
        Ok(())
    }

    async fn encode_variant(
        &self,
        _input: &Path,
        out_dir: &Path,
        rung: &QualityRung,
        duration_secs: f64,
        progress: ProgressFn<'_>,
    ) -> vf_core::Result<PathBuf> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        progress(0.5);

        if self.should_fail(rung.quality) {
            return Err(Error::tool(
                "ffmpeg",
                format!("encoding {} exited with status 1", rung.quality),
            ));
        }

        let segment_secs = duration_secs / SEGMENTS_PER_RUNG as f64;
        let mut playlist = String::from(
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXT-X-PLAYLIST-TYPE:VOD\n",
        );
        for i in 0..SEGMENTS_PER_RUNG {
            let name = format!("segment_{i:03}.ts");
            playlist.push_str(&format!("#EXTINF:{segment_secs:.3},\n{name}\n"));
            if self.drop_segment.as_deref() != Some(name.as_str()) {
                tokio::fs::write(out_dir.join(&name), format!("{}-{i}", rung.quality)).await?;
            }
        }
        playlist.push_str("#EXT-X-ENDLIST\n");

        let path = out_dir.join("index.m3u8");
        tokio::fs::write(&path, playlist).await?;
        progress(1.0);
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// TestHarness
// ---------------------------------------------------------------------------

/// Full pipeline over in-memory infrastructure.
pub struct TestHarness {
    pub db: DbPool,
    pub store: Arc<MemoryObjectStore>,
    pub transcoder: Arc<StubTranscoder>,
    pub bus: Arc<EventBus>,
    pub pipeline: Arc<Pipeline>,
    pub scratch: TempDir,
}

/// Defaults with the memory backend.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.storage.backend = "memory".into();
    config.storage.bucket = "test-bucket".into();
    config
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with(test_config(), StubTranscoder::new())
    }

    pub fn with_transcoder(transcoder: StubTranscoder) -> Self {
        Self::with(test_config(), transcoder)
    }

    pub fn with(mut config: Config, transcoder: StubTranscoder) -> Self {
        let scratch = TempDir::new().expect("failed to create scratch dir");
        config.transcode.scratch_dir = Some(scratch.path().to_path_buf());

        let db = vf_db::init_memory_pool().expect("failed to create in-memory pool");
        let store = Arc::new(MemoryObjectStore::new(config.storage.bucket.clone()));
        let transcoder = Arc::new(transcoder);
        let bus = Arc::new(EventBus::default());

        let pipeline = Arc::new(Pipeline::new(
            Arc::new(config),
            db.clone(),
            store.clone(),
            transcoder.clone(),
            bus.clone(),
        ));

        Self {
            db,
            store,
            transcoder,
            bus,
            pipeline,
            scratch,
        }
    }

    pub fn conn(&self) -> PooledConnection {
        vf_db::get_conn(&self.db).expect("failed to get connection")
    }

    pub fn video(&self, id: VideoId) -> VideoAsset {
        self.pipeline.videos.get(id).expect("video should exist")
    }

    /// Events seen so far, oldest first.
    pub fn events(&self) -> Vec<Event> {
        let mut events = self.bus.recent_events(100);
        events.reverse();
        events
    }

    pub fn event_names(&self, video_id: VideoId) -> Vec<&'static str> {
        self.events()
            .iter()
            .filter(|e| e.payload.video_id() == video_id)
            .map(|e| e.payload.name())
            .collect()
    }

    pub fn app_context(&self) -> AppContext {
        AppContext::new(self.pipeline.clone(), Arc::new(ToolRegistry::default()))
    }

    pub fn router(&self) -> Router {
        vf_server::build_router(self.app_context())
    }

    /// Initiate an upload and push every part to the store, recording each
    /// one. Returns the initiation result and the parts to complete with.
    pub async fn upload_parts(
        &self,
        file_name: &str,
        file_size_bytes: u64,
        category: Category,
    ) -> (InitiatedUpload, Vec<UploadPart>) {
        let initiated = self
            .pipeline
            .uploads
            .initiate(file_name, file_size_bytes, category)
            .await
            .expect("initiate failed");

        let mut parts = Vec::new();
        for n in 1..=initiated.total_parts {
            let offset = u64::from(n - 1) * initiated.part_size_bytes;
            let size = (file_size_bytes - offset).min(initiated.part_size_bytes);
            let etag = self
                .store
                .put_part(&initiated.upload_id, n, format!("part-{n}").into_bytes())
                .expect("put_part failed");
            let part = UploadPart {
                part_number: n,
                etag,
                size_bytes: size,
            };
            self.pipeline
                .uploads
                .record_part(initiated.video_id, &initiated.upload_id, part.clone())
                .expect("record_part failed");
            parts.push(part);
        }
        (initiated, parts)
    }

    /// Upload and complete `demo.mp4`; the video ends UPLOADED with a queued job.
    pub async fn uploaded_video(&self, category: Category) -> VideoId {
        let (initiated, parts) = self.upload_parts("demo.mp4", 104_857_600, category).await;
        self.pipeline
            .uploads
            .complete_upload(initiated.video_id, &initiated.upload_id, parts)
            .await
            .expect("complete_upload failed");
        initiated.video_id
    }

    /// Dequeue and run the next runnable job, as a worker would.
    pub async fn run_next_job(&self) -> Option<JobOutcome> {
        let job = self.pipeline.queue.dequeue("test-worker").expect("dequeue failed")?;
        Some(self.pipeline.worker.run(&job).await.expect("worker bookkeeping failed"))
    }

    /// Entries left in the scratch root (should be none between jobs).
    pub fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.scratch.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}
