//! Liveness and tool availability.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::context::AppContext;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: bool,
    /// Jobs per queue status (`queued`, `processing`, ...).
    pub jobs: Vec<JobCount>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobCount {
    pub status: String,
    pub count: i64,
}

/// GET /api/health
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service health", body = HealthResponse)
    )
)]
pub async fn health_check(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    let jobs = vf_db::get_conn(&ctx.db)
        .and_then(|conn| vf_db::queries::jobs::count_by_status(&conn));

    let (database, jobs) = match jobs {
        Ok(counts) => (
            true,
            counts
                .into_iter()
                .map(|(status, count)| JobCount { status, count })
                .collect(),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check could not reach the database");
            (false, Vec::new())
        }
    };

    Json(HealthResponse {
        status: if database { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
        jobs,
    })
}

/// GET /api/tools
#[utoipa::path(
    get,
    path = "/api/tools",
    responses(
        (status = 200, description = "External tool availability", body = Vec<vf_av::ToolInfo>)
    )
)]
pub async fn tools(State(ctx): State<AppContext>) -> Json<Vec<vf_av::ToolInfo>> {
    Json(ctx.tools.check_all())
}
