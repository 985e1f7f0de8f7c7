//! The transcode worker: turns one dequeued `process-video` job into a
//! published HLS ladder.
//!
//! Steps for a job:
//!
//! 1. claim the video (UPLOADED -> PROCESSING compare-and-set); a failed
//!    claim drops the job as stale
//! 2. create a scratch [`Workspace`]
//! 3. download and probe the source
//! 4. extract and upload the thumbnail
//! 5. encode every ladder rung, reporting progress through one writer task
//! 6. upload segments, rung playlists and the master playlist
//! 7. release the scratch workspace on every path
//! 8. record READY with the manifest, or ERROR with the message

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};

use vf_av::{Transcoder, Workspace};
use vf_core::config::TranscodeConfig;
use vf_core::events::EventPayload;
use vf_core::{
    Error, Manifest, QualityRung, Result, StorageLayout, VideoStatus, QUALITY_LADDER,
};
use vf_db::models::VideoJob;
use vf_db::queries::videos;
use vf_db::DbPool;
use vf_media::hls::VARIANT_PLAYLIST_NAME;
use vf_media::{build_master_playlist, parse_media_segments, variant_for_rung};
use vf_store::{content_type, ObjectStore};

use crate::progress::ProgressReporter;
use crate::publisher::EventPublisher;
use crate::queue::JobQueue;

/// What happened to a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The video is READY.
    Completed(Manifest),
    /// The video is ERROR; `will_retry` when the job was re-scheduled.
    Failed { error: String, will_retry: bool },
    /// The video was not in a claimable state; nothing was touched.
    Stale,
}

/// One rung's encoder output.
struct EncodedRung {
    rung: &'static QualityRung,
    out_dir: PathBuf,
    playlist: PathBuf,
}

/// Runs processing jobs. Shared by every task of the worker pool.
pub struct TranscodeWorker {
    db: DbPool,
    store: Arc<dyn ObjectStore>,
    transcoder: Arc<dyn Transcoder>,
    layout: StorageLayout,
    config: TranscodeConfig,
    publisher: EventPublisher,
    queue: JobQueue,
}

impl TranscodeWorker {
    pub fn new(
        db: DbPool,
        store: Arc<dyn ObjectStore>,
        transcoder: Arc<dyn Transcoder>,
        layout: StorageLayout,
        config: TranscodeConfig,
        publisher: EventPublisher,
        queue: JobQueue,
    ) -> Self {
        Self {
            db,
            store,
            transcoder,
            layout,
            config,
            publisher,
            queue,
        }
    }

    /// Process one dequeued job to completion.
    ///
    /// Pipeline failures are recorded on the video and reported as
    /// [`JobOutcome::Failed`]; an `Err` means bookkeeping itself failed.
    pub async fn run(&self, job: &VideoJob) -> Result<JobOutcome> {
        let video_id = job.video_id;
        let job_id = job.id;

        // 1. claim
        let claimed = {
            let conn = vf_db::get_conn(&self.db)?;
            videos::claim_for_processing(&conn, video_id, job_id)?
        };
        if !claimed {
            let status = {
                let conn = vf_db::get_conn(&self.db)?;
                videos::get_video(&conn, video_id)?.map(|v| v.status)
            };
            let reason = match status {
                Some(status) => format!("stale job: video {video_id} is {status}"),
                None => format!("stale job: video {video_id} no longer exists"),
            };
            tracing::warn!(video_id = %video_id, job_id = %job_id, "{reason}");
            self.queue.fail(job_id, &reason)?;
            return Ok(JobOutcome::Stale);
        }

        tracing::info!(
            video_id = %video_id,
            job_id = %job_id,
            attempt = job.retry_count + 1,
            "processing started"
        );
        self.publisher
            .emit(EventPayload::ProcessingStarted { video_id, job_id });

        // 2-7. scratch space is released whatever produce() returns
        let result = match Workspace::new(self.config.scratch_dir.as_deref(), "job") {
            Ok(workspace) => {
                let result = self.produce(job, &workspace).await;
                match tokio::task::spawn_blocking(move || workspace.release()).await {
                    Ok(report) if !report.is_clean() => {
                        tracing::warn!(
                            job_id = %job_id,
                            failed = report.failed,
                            "scratch cleanup incomplete"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "scratch cleanup task failed");
                    }
                }
                result
            }
            Err(e) => Err(e),
        };

        // 8. record the outcome
        match result {
            Ok(manifest) => self.finish_ready(job, manifest),
            Err(e) => self.finish_failed(job, &e),
        }
    }

    /// Steps 3-6. Returns the manifest to publish.
    async fn produce(&self, job: &VideoJob, workspace: &Workspace) -> Result<Manifest> {
        let video_id = job.video_id;
        let job_id = job.id;

        // 3. download + probe
        if self.store.head_object(&job.source_key).await?.is_none() {
            return Err(Error::storage(
                "head_object",
                format!("source object missing: {}", job.source_key),
            ));
        }
        let file_name = Path::new(&job.source_key)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("source");
        let source_path = workspace.source_path(file_name);
        let bytes = self
            .store
            .download_to_file(&job.source_key, &source_path)
            .await?;
        tracing::debug!(video_id = %video_id, bytes, "source downloaded");

        let probed = self.transcoder.probe(&source_path).await?;
        let duration = probed.duration_secs;
        {
            let conn = vf_db::get_conn(&self.db)?;
            videos::set_media_info(&conn, video_id, job_id, duration, &probed.metadata)?;
        }

        // 4. thumbnail
        let thumbnail_path = workspace.thumbnail_path();
        let at_secs = duration * self.config.thumbnail_position.clamp(0.0, 1.0);
        self.transcoder
            .extract_thumbnail(&source_path, at_secs, &thumbnail_path)
            .await?;
        let thumbnail_key = self.layout.thumbnail_key(job.category, video_id);
        self.store
            .put_file(&thumbnail_key, &thumbnail_path, content_type::JPEG)
            .await?;
        {
            let conn = vf_db::get_conn(&self.db)?;
            videos::set_thumbnail_key(&conn, video_id, job_id, &thumbnail_key)?;
        }

        // 5. encode
        let encoded = self.encode_ladder(job, workspace, &source_path, duration).await?;

        // 6. upload
        self.publish_outputs(job, encoded).await
    }

    async fn encode_ladder(
        &self,
        job: &VideoJob,
        workspace: &Workspace,
        source_path: &Path,
        duration: f64,
    ) -> Result<Vec<EncodedRung>> {
        let reporter = ProgressReporter::spawn(
            self.db.clone(),
            self.publisher.clone(),
            job.video_id,
            job.id,
            QUALITY_LADDER.iter().map(|r| r.quality.to_string()).collect(),
        );

        // Collected up front so the stream owns concrete futures.
        let rungs: Vec<_> = QUALITY_LADDER
            .iter()
            .enumerate()
            .map(|(index, rung): (usize, &'static QualityRung)| {
                let progress = reporter.sink(index);
                async move {
                    let out_dir = workspace.variant_dir(rung.quality)?;
                    tracing::info!(video_id = %job.video_id, quality = rung.quality, "encoding rung");
                    let playlist = self
                        .transcoder
                        .encode_variant(source_path, &out_dir, rung, duration, &progress)
                        .await?;
                    Ok::<_, Error>(EncodedRung {
                        rung,
                        out_dir,
                        playlist,
                    })
                }
            })
            .collect();

        let encodes = futures::stream::iter(rungs)
            .buffered(self.config.max_parallel_rungs.max(1))
            .try_collect::<Vec<_>>()
            .await;

        reporter.finish().await;
        encodes
    }

    async fn publish_outputs(
        &self,
        job: &VideoJob,
        encoded: Vec<EncodedRung>,
    ) -> Result<Manifest> {
        let video_id = job.video_id;
        let mut variants = Vec::with_capacity(encoded.len());

        for EncodedRung {
            rung,
            out_dir,
            playlist,
        } in encoded
        {
            let quality = rung.quality;
            let text = tokio::fs::read_to_string(&playlist).await?;
            let segments = parse_media_segments(&text);
            if segments.is_empty() {
                return Err(Error::transcode(
                    "upload",
                    format!("{quality} playlist lists no segments"),
                ));
            }

            let mut files = Vec::with_capacity(segments.len());
            for segment in &segments {
                if !is_plain_file_name(segment) {
                    return Err(Error::transcode(
                        "upload",
                        format!("{quality} playlist references unexpected segment uri {segment}"),
                    ));
                }
                let path = out_dir.join(segment);
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Err(Error::transcode(
                        "upload",
                        format!("{quality} playlist references missing segment {segment}"),
                    ));
                }
                files.push((segment, path));
            }

            for (segment, path) in files {
                let key = self
                    .layout
                    .variant_object_key(job.category, video_id, quality, segment);
                self.store
                    .put_file(&key, &path, content_type::MPEG_TS)
                    .await?;
            }

            let playlist_key =
                self.layout
                    .variant_object_key(job.category, video_id, quality, VARIANT_PLAYLIST_NAME);
            self.store
                .put_file(&playlist_key, &playlist, content_type::HLS_PLAYLIST)
                .await?;
            tracing::debug!(
                video_id = %video_id,
                quality,
                segments = segments.len(),
                "rung uploaded"
            );

            variants.push(variant_for_rung(rung, playlist_key));
        }

        let master_playlist_key = self.layout.master_playlist_key(job.category, video_id);
        let master = build_master_playlist(&variants);
        self.store
            .put_object(
                &master_playlist_key,
                Bytes::from(master),
                content_type::HLS_PLAYLIST,
            )
            .await?;

        Ok(Manifest {
            master_playlist_key,
            variants,
        })
    }

    fn finish_ready(&self, job: &VideoJob, manifest: Manifest) -> Result<JobOutcome> {
        let video_id = job.video_id;
        let job_id = job.id;

        let marked = {
            let conn = vf_db::get_conn(&self.db)?;
            videos::mark_ready(&conn, video_id, job_id, &manifest)?
        };
        if !marked {
            // Only possible if the row vanished or was claimed by another job.
            let reason = format!("video {video_id} left PROCESSING before completion");
            tracing::warn!(video_id = %video_id, job_id = %job_id, "{reason}");
            self.queue.fail(job_id, &reason)?;
            return Ok(JobOutcome::Stale);
        }
        self.queue.complete(job_id)?;

        let qualities = manifest.variants.iter().map(|v| v.quality.clone()).collect();
        tracing::info!(video_id = %video_id, job_id = %job_id, "processing completed");
        self.publisher.emit(EventPayload::ProcessingCompleted {
            video_id,
            job_id,
            master_playlist_key: manifest.master_playlist_key.clone(),
            qualities,
        });
        Ok(JobOutcome::Completed(manifest))
    }

    fn finish_failed(&self, job: &VideoJob, error: &Error) -> Result<JobOutcome> {
        let video_id = job.video_id;
        let job_id = job.id;
        let message = error.to_string();
        let wants_retry = error.is_retryable() && job.has_retry_budget();

        tracing::error!(
            video_id = %video_id,
            job_id = %job_id,
            error = %message,
            retryable = error.is_retryable(),
            "processing failed"
        );

        {
            let conn = vf_db::get_conn(&self.db)?;
            videos::fail_processing(&conn, video_id, job_id, &message)?;
        }

        let will_retry = wants_retry && self.schedule_retry(job, &message)?;
        if !will_retry {
            self.queue.fail(job_id, &message)?;
        }

        self.publisher.emit(EventPayload::ProcessingFailed {
            video_id,
            job_id,
            error: message.clone(),
            will_retry,
        });
        Ok(JobOutcome::Failed {
            error: message,
            will_retry,
        })
    }

    /// Reset the failed video to UPLOADED and put the job back in the queue.
    fn schedule_retry(&self, job: &VideoJob, message: &str) -> Result<bool> {
        let reset = {
            let conn = vf_db::get_conn(&self.db)?;
            match videos::get_video(&conn, job.video_id)? {
                Some(video) => videos::reset_for_reprocess(&conn, video.id, video.version)?,
                None => false,
            }
        };
        if !reset {
            return Ok(false);
        }

        match self.queue.retry(job, message)? {
            Some(delay) => {
                tracing::info!(
                    video_id = %job.video_id,
                    job_id = %job.id,
                    delay_secs = delay.as_secs(),
                    "processing retry scheduled"
                );
                Ok(true)
            }
            None => {
                // Budget ran out underneath us: put the video back in ERROR.
                let conn = vf_db::get_conn(&self.db)?;
                videos::mark_error(&conn, job.video_id, &[VideoStatus::Uploaded], message)?;
                Ok(false)
            }
        }
    }
}

/// A segment URI that names a file directly inside the rung directory.
fn is_plain_file_name(uri: &str) -> bool {
    !uri.is_empty()
        && uri != "."
        && uri != ".."
        && !uri.contains('/')
        && !uri.contains('\\')
        && !uri.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_uris_must_be_local_files() {
        assert!(is_plain_file_name("segment_000.ts"));
        assert!(!is_plain_file_name("../etc/passwd"));
        assert!(!is_plain_file_name("https://cdn/x.ts"));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name(""));
    }
}
