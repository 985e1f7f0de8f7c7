//! Video asset domain model and its lifecycle state machine.
//!
//! [`VideoStatus`] owns the transition table. Persistence derives its
//! `WHERE status IN (...)` guards from [`VideoStatus::predecessors`], so the
//! database and the in-memory checks can never disagree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::ids::{JobId, VideoId};

// ---------------------------------------------------------------------------
// VideoStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a [`VideoAsset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoStatus {
    Uploading,
    Uploaded,
    Processing,
    Ready,
    Error,
    Archived,
}

/// Forward transitions. Reprocess resets are listed separately in
/// [`VideoStatus::REPROCESSABLE`].
const TRANSITIONS: &[(VideoStatus, VideoStatus)] = &[
    (VideoStatus::Uploading, VideoStatus::Uploaded),
    (VideoStatus::Uploading, VideoStatus::Error),
    (VideoStatus::Uploaded, VideoStatus::Processing),
    (VideoStatus::Uploaded, VideoStatus::Error),
    (VideoStatus::Processing, VideoStatus::Ready),
    (VideoStatus::Processing, VideoStatus::Error),
    (VideoStatus::Ready, VideoStatus::Archived),
];

impl VideoStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [VideoStatus; 6] = [
        VideoStatus::Uploading,
        VideoStatus::Uploaded,
        VideoStatus::Processing,
        VideoStatus::Ready,
        VideoStatus::Error,
        VideoStatus::Archived,
    ];

    /// Statuses from which a manual reprocess may reset the video to UPLOADED.
    pub const REPROCESSABLE: [VideoStatus; 3] =
        [VideoStatus::Uploaded, VideoStatus::Ready, VideoStatus::Error];

    /// Wire/database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "UPLOADING",
            Self::Uploaded => "UPLOADED",
            Self::Processing => "PROCESSING",
            Self::Ready => "READY",
            Self::Error => "ERROR",
            Self::Archived => "ARCHIVED",
        }
    }

    /// Whether `self -> to` is a forward transition of the state machine.
    pub fn can_transition_to(&self, to: VideoStatus) -> bool {
        TRANSITIONS.iter().any(|&(f, t)| f == *self && t == to)
    }

    /// Whether a manual reprocess is allowed from this status.
    pub fn can_reprocess(&self) -> bool {
        Self::REPROCESSABLE.contains(self)
    }

    /// Every status that may transition forward into `to`.
    pub fn predecessors(to: VideoStatus) -> Vec<VideoStatus> {
        TRANSITIONS
            .iter()
            .filter(|&&(_, t)| t == to)
            .map(|&(f, _)| f)
            .collect()
    }

    /// Check a forward transition, returning [`Error::InvalidTransition`] when
    /// it is not allowed.
    pub fn ensure_transition(&self, to: VideoStatus) -> crate::Result<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition { from: *self, to })
        }
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Validation(format!("unknown video status: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Content category; selects the storage folder a video lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    DailyClasses,
    MasterClasses,
    Psychology,
    Stocks,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::DailyClasses,
        Category::MasterClasses,
        Category::Psychology,
        Category::Stocks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DailyClasses => "DAILY_CLASSES",
            Self::MasterClasses => "MASTER_CLASSES",
            Self::Psychology => "PSYCHOLOGY",
            Self::Stocks => "STOCKS",
        }
    }

    /// Lowercase form used inside thumbnail keys (`daily_classes`).
    pub fn slug(&self) -> &'static str {
        match self {
            Self::DailyClasses => "daily_classes",
            Self::MasterClasses => "master_classes",
            Self::Psychology => "psychology",
            Self::Stocks => "stocks",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s) || c.slug() == s)
            .ok_or_else(|| Error::Validation(format!("unknown category: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Upload session
// ---------------------------------------------------------------------------

/// One uploaded part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPart {
    pub part_number: u32,
    pub etag: String,
    pub size_bytes: u64,
}

/// Bookkeeping for an in-flight multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub upload_id: String,
    /// Recorded parts, sorted by part number.
    pub parts: Vec<UploadPart>,
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
    /// Number of parts the client was told to upload.
    pub total_parts: u32,
    /// Part size the client was told to use.
    pub part_size_bytes: u64,
}

// ---------------------------------------------------------------------------
// Media metadata and manifest
// ---------------------------------------------------------------------------

/// Technical metadata of the source file, filled in once processing begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
    /// Overall bitrate in bits per second.
    pub bitrate: u64,
}

/// One encoded HLS rendition referenced from the master playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub quality: String,
    pub playlist_key: String,
    pub bandwidth: u64,
    /// `WIDTHxHEIGHT`.
    pub resolution: String,
}

/// Published streaming manifest; present only on READY videos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub master_playlist_key: String,
    pub variants: Vec<Variant>,
}

// ---------------------------------------------------------------------------
// VideoAsset
// ---------------------------------------------------------------------------

/// The persisted video entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoAsset {
    pub id: VideoId,
    pub file_name: String,
    pub category: Category,
    pub status: VideoStatus,
    pub source_bucket: String,
    pub source_key: String,
    pub file_size_bytes: u64,
    pub duration_secs: Option<f64>,
    pub media_metadata: Option<MediaMetadata>,
    pub thumbnail_key: Option<String>,
    pub upload_session: Option<UploadSession>,
    pub manifest: Option<Manifest>,
    pub processing_error: Option<String>,
    pub progress: f64,
    pub job_id: Option<JobId>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl VideoAsset {
    /// Qualities that can be streamed, derived from the manifest.
    pub fn available_qualities(&self) -> Vec<String> {
        self.manifest
            .as_ref()
            .map(|m| m.variants.iter().map(|v| v.quality.clone()).collect())
            .unwrap_or_default()
    }

    /// Whether `upload_id` names this video's current upload session.
    pub fn matches_upload(&self, upload_id: &str) -> bool {
        self.upload_session
            .as_ref()
            .is_some_and(|s| s.upload_id == upload_id)
    }
}
