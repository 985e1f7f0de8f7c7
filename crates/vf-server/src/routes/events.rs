//! Recent lifecycle events from the in-memory ring buffer.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::context::AppContext;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct RecentEventsParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// `upload` or `processing`.
    pub category: Option<String>,
    /// Only events about this video.
    pub video_id: Option<String>,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct EventResponse {
    pub id: String,
    pub timestamp: String,
    pub category: String,
    /// Kebab-case event name, e.g. `processing-completed`.
    #[serde(rename = "type")]
    pub event_type: String,
    pub video_id: String,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

impl EventResponse {
    fn from_event(event: &vf_core::events::Event) -> Self {
        Self {
            id: event.id.to_string(),
            timestamp: event.timestamp.to_rfc3339(),
            category: serde_json::to_value(event.category)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default(),
            event_type: event.payload.name().to_string(),
            video_id: event.payload.video_id().to_string(),
            payload: serde_json::to_value(&event.payload).unwrap_or_default(),
        }
    }
}

/// GET /api/events/recent
#[utoipa::path(
    get,
    path = "/api/events/recent",
    params(RecentEventsParams),
    responses(
        (status = 200, description = "Recent events, newest first", body = Vec<EventResponse>)
    )
)]
pub async fn recent_events(
    State(ctx): State<AppContext>,
    Query(params): Query<RecentEventsParams>,
) -> Json<Vec<EventResponse>> {
    let limit = params.limit.min(100);
    let events = ctx
        .event_bus
        .recent_events(100)
        .iter()
        .map(EventResponse::from_event)
        .filter(|e| params.category.as_deref().is_none_or(|c| e.category == c))
        .filter(|e| params.video_id.as_deref().is_none_or(|v| e.video_id == v))
        .take(limit)
        .collect();
    Json(events)
}
