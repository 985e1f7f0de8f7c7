//! Multipart upload route handlers.
//!
//! Part bodies never pass through this server: clients PUT them to the
//! signed URLs and report each part's etag back here.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use vf_core::{Category, UploadPart, VideoId};

use crate::context::AppContext;
use crate::error::{parse_id, AppError};
use crate::routes::videos::VideoResponse;

/// Request body for starting an upload.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct InitiateUploadRequest {
    pub file_name: String,
    pub file_size_bytes: u64,
    /// `DAILY_CLASSES`, `MASTER_CLASSES`, `PSYCHOLOGY` or `STOCKS`.
    pub category: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct InitiateUploadResponse {
    pub video_id: String,
    pub upload_id: String,
    pub source_key: String,
    pub part_size_bytes: u64,
    pub total_parts: u32,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SignedUrlResponse {
    pub url: String,
    pub part_number: u32,
    pub expires_in_secs: u64,
}

/// One uploaded part as reported by the client.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct PartRequest {
    pub part_number: u32,
    pub etag: String,
    /// Optional on completion; filled in from recorded parts when omitted.
    #[serde(default)]
    pub size_bytes: u64,
}

impl From<PartRequest> for UploadPart {
    fn from(p: PartRequest) -> Self {
        UploadPart {
            part_number: p.part_number,
            etag: p.etag,
            size_bytes: p.size_bytes,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PartProgressResponse {
    pub parts_uploaded: u32,
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CompleteUploadRequest {
    pub parts: Vec<PartRequest>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CompleteUploadResponse {
    pub video_id: String,
    pub status: String,
    /// Processing job created by this call; absent on a repeated completion.
    pub job_id: Option<String>,
    pub already_completed: bool,
}

/// POST /api/uploads
#[utoipa::path(
    post,
    path = "/api/uploads",
    request_body = InitiateUploadRequest,
    responses(
        (status = 201, description = "Upload initiated", body = InitiateUploadResponse),
        (status = 400, description = "Invalid file name, size or category"),
        (status = 502, description = "Object store failure")
    )
)]
pub async fn initiate_upload(
    State(ctx): State<AppContext>,
    Json(payload): Json<InitiateUploadRequest>,
) -> Result<impl IntoResponse, AppError> {
    let category: Category = payload.category.parse()?;
    let initiated = ctx
        .pipeline
        .uploads
        .initiate(&payload.file_name, payload.file_size_bytes, category)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InitiateUploadResponse {
            video_id: initiated.video_id.to_string(),
            upload_id: initiated.upload_id,
            source_key: initiated.source_key,
            part_size_bytes: initiated.part_size_bytes,
            total_parts: initiated.total_parts,
        }),
    ))
}

/// GET /api/uploads/:video_id/:upload_id/parts/:part_number
#[utoipa::path(
    get,
    path = "/api/uploads/{video_id}/{upload_id}/parts/{part_number}",
    params(
        ("video_id" = String, Path, description = "Video ID"),
        ("upload_id" = String, Path, description = "Multipart upload ID"),
        ("part_number" = u32, Path, description = "1-based part number")
    ),
    responses(
        (status = 200, description = "Presigned part URL", body = SignedUrlResponse),
        (status = 404, description = "Unknown video or upload")
    )
)]
pub async fn part_upload_url(
    State(ctx): State<AppContext>,
    Path((video_id, upload_id, part_number)): Path<(String, String, u32)>,
) -> Result<Json<SignedUrlResponse>, AppError> {
    let video_id: VideoId = parse_id(&video_id, "video")?;
    let signed = ctx
        .pipeline
        .uploads
        .part_upload_url(video_id, &upload_id, part_number)
        .await?;

    Ok(Json(SignedUrlResponse {
        url: signed.url,
        part_number: signed.part_number,
        expires_in_secs: signed.expires_in_secs,
    }))
}

/// PUT /api/uploads/:video_id/:upload_id/parts
#[utoipa::path(
    put,
    path = "/api/uploads/{video_id}/{upload_id}/parts",
    params(
        ("video_id" = String, Path, description = "Video ID"),
        ("upload_id" = String, Path, description = "Multipart upload ID")
    ),
    request_body = PartRequest,
    responses(
        (status = 200, description = "Part recorded", body = PartProgressResponse),
        (status = 404, description = "Unknown video or upload")
    )
)]
pub async fn record_part(
    State(ctx): State<AppContext>,
    Path((video_id, upload_id)): Path<(String, String)>,
    Json(part): Json<PartRequest>,
) -> Result<Json<PartProgressResponse>, AppError> {
    let video_id: VideoId = parse_id(&video_id, "video")?;
    let progress = ctx
        .pipeline
        .uploads
        .record_part(video_id, &upload_id, part.into())?;

    Ok(Json(PartProgressResponse {
        parts_uploaded: progress.parts_uploaded,
        bytes_uploaded: progress.bytes_uploaded,
        total_bytes: progress.total_bytes,
    }))
}

/// POST /api/uploads/:video_id/:upload_id/complete
#[utoipa::path(
    post,
    path = "/api/uploads/{video_id}/{upload_id}/complete",
    params(
        ("video_id" = String, Path, description = "Video ID"),
        ("upload_id" = String, Path, description = "Multipart upload ID")
    ),
    request_body = CompleteUploadRequest,
    responses(
        (status = 200, description = "Upload completed and queued", body = CompleteUploadResponse),
        (status = 400, description = "Missing or inconsistent parts"),
        (status = 409, description = "Video is not uploading"),
        (status = 502, description = "Object store refused the completion")
    )
)]
pub async fn complete_upload(
    State(ctx): State<AppContext>,
    Path((video_id, upload_id)): Path<(String, String)>,
    Json(payload): Json<CompleteUploadRequest>,
) -> Result<Json<CompleteUploadResponse>, AppError> {
    let video_id: VideoId = parse_id(&video_id, "video")?;
    let parts = payload.parts.into_iter().map(UploadPart::from).collect();
    let completed = ctx
        .pipeline
        .uploads
        .complete_upload(video_id, &upload_id, parts)
        .await?;

    Ok(Json(CompleteUploadResponse {
        video_id: completed.video_id.to_string(),
        status: completed.status.to_string(),
        job_id: completed.job_id.map(|id| id.to_string()),
        already_completed: completed.already_completed,
    }))
}

/// DELETE /api/uploads/:video_id/:upload_id
#[utoipa::path(
    delete,
    path = "/api/uploads/{video_id}/{upload_id}",
    params(
        ("video_id" = String, Path, description = "Video ID"),
        ("upload_id" = String, Path, description = "Multipart upload ID")
    ),
    responses(
        (status = 200, description = "Upload aborted", body = VideoResponse),
        (status = 409, description = "Video is already processing")
    )
)]
pub async fn abort_upload(
    State(ctx): State<AppContext>,
    Path((video_id, upload_id)): Path<(String, String)>,
) -> Result<Json<VideoResponse>, AppError> {
    let video_id: VideoId = parse_id(&video_id, "video")?;
    let video = ctx
        .pipeline
        .uploads
        .abort_upload(video_id, &upload_id)
        .await?;
    Ok(Json(VideoResponse::from_model(&video)))
}
