//! Axum router construction.

use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::context::AppContext;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    info(title = "vodforge", description = "Video ingest and HLS processing API"),
    paths(
        routes::uploads::initiate_upload,
        routes::uploads::part_upload_url,
        routes::uploads::record_part,
        routes::uploads::complete_upload,
        routes::uploads::abort_upload,
        routes::videos::list_videos,
        routes::videos::get_video,
        routes::videos::reprocess_video,
        routes::videos::archive_video,
        routes::events::recent_events,
        routes::health::health_check,
        routes::health::tools,
    ),
    components(schemas(
        routes::uploads::InitiateUploadRequest,
        routes::uploads::InitiateUploadResponse,
        routes::uploads::SignedUrlResponse,
        routes::uploads::PartRequest,
        routes::uploads::PartProgressResponse,
        routes::uploads::CompleteUploadRequest,
        routes::uploads::CompleteUploadResponse,
        routes::videos::VideoResponse,
        routes::videos::VideoListResponse,
        routes::videos::MediaMetadataResponse,
        routes::videos::UploadSessionResponse,
        routes::videos::ManifestResponse,
        routes::videos::VariantResponse,
        routes::videos::ReprocessRequest,
        routes::events::EventResponse,
        routes::health::HealthResponse,
        routes::health::JobCount,
        vf_av::ToolInfo,
    ))
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        // Uploads
        .route("/uploads", post(routes::uploads::initiate_upload))
        .route(
            "/uploads/{video_id}/{upload_id}",
            delete(routes::uploads::abort_upload),
        )
        .route(
            "/uploads/{video_id}/{upload_id}/parts",
            put(routes::uploads::record_part),
        )
        .route(
            "/uploads/{video_id}/{upload_id}/parts/{part_number}",
            get(routes::uploads::part_upload_url),
        )
        .route(
            "/uploads/{video_id}/{upload_id}/complete",
            post(routes::uploads::complete_upload),
        )
        // Videos
        .route("/videos", get(routes::videos::list_videos))
        .route("/videos/{id}", get(routes::videos::get_video))
        .route(
            "/videos/{id}/reprocess",
            post(routes::videos::reprocess_video),
        )
        .route("/videos/{id}/archive", post(routes::videos::archive_video))
        // Events
        .route("/events/recent", get(routes::events::recent_events))
        // Service
        .route("/health", get(routes::health::health_check))
        .route("/tools", get(routes::health::tools))
        .route("/openapi.json", get(openapi_json));

    Router::new()
        .nest("/api", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
