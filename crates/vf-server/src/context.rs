//! Application context shared by every route handler via Axum state.

use std::sync::Arc;

use vf_av::ToolRegistry;
use vf_core::config::Config;
use vf_core::events::EventBus;
use vf_db::DbPool;
use vf_pipeline::Pipeline;

/// Cheaply cloneable: only holds the pool and `Arc`s.
#[derive(Clone)]
pub struct AppContext {
    pub db: DbPool,
    pub config: Arc<Config>,
    /// Upload, video and queue services.
    pub pipeline: Arc<Pipeline>,
    pub event_bus: Arc<EventBus>,
    pub tools: Arc<ToolRegistry>,
}

impl AppContext {
    pub fn new(pipeline: Arc<Pipeline>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            db: pipeline.db.clone(),
            config: Arc::new(pipeline.config().clone()),
            event_bus: Arc::clone(pipeline.publisher.bus()),
            pipeline,
            tools,
        }
    }
}
