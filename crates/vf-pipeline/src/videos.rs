//! Read access and manual lifecycle operations on video assets.

use serde::Serialize;

use vf_core::{Error, Result, VideoAsset, VideoId, VideoStatus};
use vf_db::queries::videos::{self, VideoFilter};
use vf_db::DbPool;

use crate::queue::{JobQueue, ProcessVideo, PROCESS_VIDEO};

/// One page of [`VideoService::list`].
#[derive(Debug, Clone, Serialize)]
pub struct VideoPage {
    pub videos: Vec<VideoAsset>,
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
}

pub struct VideoService {
    db: DbPool,
    queue: JobQueue,
}

impl VideoService {
    pub fn new(db: DbPool, queue: JobQueue) -> Self {
        Self { db, queue }
    }

    pub fn get(&self, id: VideoId) -> Result<VideoAsset> {
        let conn = vf_db::get_conn(&self.db)?;
        videos::get_video(&conn, id)?.ok_or_else(|| Error::not_found("video", id))
    }

    pub fn list(&self, filter: VideoFilter, offset: i64, limit: i64) -> Result<VideoPage> {
        let offset = offset.max(0);
        let limit = limit.clamp(1, 500);
        let conn = vf_db::get_conn(&self.db)?;
        Ok(VideoPage {
            videos: videos::list_videos(&conn, filter, offset, limit)?,
            total: videos::count_videos(&conn, filter)?,
            offset,
            limit,
        })
    }

    /// Reset a video to UPLOADED and queue it for processing again.
    ///
    /// `expected_version` must equal the stored version; of two racing calls
    /// with the same version exactly one succeeds and the other gets
    /// [`Error::Conflict`].
    pub fn reprocess(&self, id: VideoId, expected_version: i64) -> Result<VideoAsset> {
        let video = self.get(id)?;
        if !video.status.can_reprocess() {
            return Err(Error::InvalidTransition {
                from: video.status,
                to: VideoStatus::Uploaded,
            });
        }
        if video.version != expected_version {
            return Err(Error::Conflict(format!(
                "video {id} is at version {}, not {expected_version}",
                video.version
            )));
        }

        let reset = {
            let conn = vf_db::get_conn(&self.db)?;
            videos::reset_for_reprocess(&conn, id, expected_version)?
        };
        if !reset {
            return Err(Error::Conflict(format!(
                "video {id} was modified concurrently"
            )));
        }

        if self.queue.has_queued_job(id)? {
            tracing::info!(video_id = %id, "reprocess: a job is already queued");
        } else {
            self.queue.enqueue(
                PROCESS_VIDEO,
                &ProcessVideo {
                    video_id: id,
                    source_key: video.source_key.clone(),
                    category: video.category,
                },
            )?;
        }

        tracing::info!(video_id = %id, from = %video.status, "video queued for reprocessing");
        self.get(id)
    }

    /// READY -> ARCHIVED.
    pub fn archive(&self, id: VideoId) -> Result<VideoAsset> {
        let video = self.get(id)?;
        video.status.ensure_transition(VideoStatus::Archived)?;

        let archived = {
            let conn = vf_db::get_conn(&self.db)?;
            videos::archive_video(&conn, id)?
        };
        if !archived {
            return Err(Error::Conflict(format!(
                "video {id} was modified concurrently"
            )));
        }

        tracing::info!(video_id = %id, "video archived");
        self.get(id)
    }
}
