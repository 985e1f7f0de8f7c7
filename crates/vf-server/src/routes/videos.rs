//! Video asset route handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use vf_core::{Category, VideoAsset, VideoId, VideoStatus};
use vf_db::queries::videos::VideoFilter;

use crate::context::AppContext;
use crate::error::{parse_id, AppError};

/// Query parameters for listing videos.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListVideosParams {
    pub status: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct MediaMetadataResponse {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
    pub bitrate: u64,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct UploadSessionResponse {
    pub upload_id: String,
    pub parts_uploaded: usize,
    pub total_parts: u32,
    pub part_size_bytes: u64,
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct VariantResponse {
    pub quality: String,
    pub playlist_key: String,
    pub bandwidth: u64,
    pub resolution: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ManifestResponse {
    pub master_playlist_key: String,
    pub variants: Vec<VariantResponse>,
}

/// Video asset response.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct VideoResponse {
    pub id: String,
    pub file_name: String,
    pub category: String,
    pub status: String,
    pub source_bucket: String,
    pub source_key: String,
    pub file_size_bytes: u64,
    pub duration_secs: Option<f64>,
    pub media_metadata: Option<MediaMetadataResponse>,
    pub thumbnail_key: Option<String>,
    pub upload: Option<UploadSessionResponse>,
    pub manifest: Option<ManifestResponse>,
    pub available_qualities: Vec<String>,
    pub processing_error: Option<String>,
    pub progress: f64,
    pub job_id: Option<String>,
    pub version: i64,
    pub created_at: String,
    pub uploaded_at: Option<String>,
    pub processed_at: Option<String>,
    pub updated_at: String,
}

impl VideoResponse {
    pub fn from_model(video: &VideoAsset) -> Self {
        Self {
            id: video.id.to_string(),
            file_name: video.file_name.clone(),
            category: video.category.to_string(),
            status: video.status.to_string(),
            source_bucket: video.source_bucket.clone(),
            source_key: video.source_key.clone(),
            file_size_bytes: video.file_size_bytes,
            duration_secs: video.duration_secs,
            media_metadata: video.media_metadata.as_ref().map(|m| MediaMetadataResponse {
                width: m.width,
                height: m.height,
                fps: m.fps,
                codec: m.codec.clone(),
                bitrate: m.bitrate,
            }),
            thumbnail_key: video.thumbnail_key.clone(),
            upload: video.upload_session.as_ref().map(|s| UploadSessionResponse {
                upload_id: s.upload_id.clone(),
                parts_uploaded: s.parts.len(),
                total_parts: s.total_parts,
                part_size_bytes: s.part_size_bytes,
                bytes_uploaded: s.bytes_uploaded,
                total_bytes: s.total_bytes,
            }),
            manifest: video.manifest.as_ref().map(|m| ManifestResponse {
                master_playlist_key: m.master_playlist_key.clone(),
                variants: m
                    .variants
                    .iter()
                    .map(|v| VariantResponse {
                        quality: v.quality.clone(),
                        playlist_key: v.playlist_key.clone(),
                        bandwidth: v.bandwidth,
                        resolution: v.resolution.clone(),
                    })
                    .collect(),
            }),
            available_qualities: video.available_qualities(),
            processing_error: video.processing_error.clone(),
            progress: video.progress,
            job_id: video.job_id.map(|id| id.to_string()),
            version: video.version,
            created_at: video.created_at.to_rfc3339(),
            uploaded_at: video.uploaded_at.map(|t| t.to_rfc3339()),
            processed_at: video.processed_at.map(|t| t.to_rfc3339()),
            updated_at: video.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct VideoListResponse {
    pub videos: Vec<VideoResponse>,
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
}

/// Request body for reprocessing.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ReprocessRequest {
    /// The `version` the caller last read.
    pub version: i64,
}

/// GET /api/videos
#[utoipa::path(
    get,
    path = "/api/videos",
    params(ListVideosParams),
    responses(
        (status = 200, description = "List videos, newest first", body = VideoListResponse),
        (status = 400, description = "Unknown status or category")
    )
)]
pub async fn list_videos(
    State(ctx): State<AppContext>,
    Query(params): Query<ListVideosParams>,
) -> Result<Json<VideoListResponse>, AppError> {
    let filter = VideoFilter {
        status: params
            .status
            .as_deref()
            .map(str::parse::<VideoStatus>)
            .transpose()?,
        category: params
            .category
            .as_deref()
            .map(str::parse::<Category>)
            .transpose()?,
    };

    let page = ctx.pipeline.videos.list(filter, params.offset, params.limit)?;
    Ok(Json(VideoListResponse {
        videos: page.videos.iter().map(VideoResponse::from_model).collect(),
        total: page.total,
        offset: page.offset,
        limit: page.limit,
    }))
}

/// GET /api/videos/:id
#[utoipa::path(
    get,
    path = "/api/videos/{id}",
    params(("id" = String, Path, description = "Video ID")),
    responses(
        (status = 200, description = "Video details", body = VideoResponse),
        (status = 404, description = "Video not found")
    )
)]
pub async fn get_video(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<VideoResponse>, AppError> {
    let id: VideoId = parse_id(&id, "video")?;
    let video = ctx.pipeline.videos.get(id)?;
    Ok(Json(VideoResponse::from_model(&video)))
}

/// POST /api/videos/:id/reprocess
#[utoipa::path(
    post,
    path = "/api/videos/{id}/reprocess",
    params(("id" = String, Path, description = "Video ID")),
    request_body = ReprocessRequest,
    responses(
        (status = 200, description = "Video reset to UPLOADED and queued", body = VideoResponse),
        (status = 404, description = "Video not found"),
        (status = 409, description = "Stale version or status cannot be reprocessed")
    )
)]
pub async fn reprocess_video(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(payload): Json<ReprocessRequest>,
) -> Result<Json<VideoResponse>, AppError> {
    let id: VideoId = parse_id(&id, "video")?;
    let video = ctx.pipeline.videos.reprocess(id, payload.version)?;
    Ok(Json(VideoResponse::from_model(&video)))
}

/// POST /api/videos/:id/archive
#[utoipa::path(
    post,
    path = "/api/videos/{id}/archive",
    params(("id" = String, Path, description = "Video ID")),
    responses(
        (status = 200, description = "Video archived", body = VideoResponse),
        (status = 409, description = "Only READY videos can be archived")
    )
)]
pub async fn archive_video(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<VideoResponse>, AppError> {
    let id: VideoId = parse_id(&id, "video")?;
    let video = ctx.pipeline.videos.archive(id)?;
    Ok(Json(VideoResponse::from_model(&video)))
}
