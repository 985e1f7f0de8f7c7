//! vf-server: HTTP API and process lifecycle.
//!
//! This crate ties the other vf-* crates together into a running service:
//!
//! - Axum-based HTTP API for uploads, videos, events and health
//! - The transcode worker pool draining the durable job queue
//! - Graceful shutdown via signal handling

pub mod context;
pub mod error;
pub mod router;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use vf_av::{FfmpegTranscoder, ToolRegistry};
use vf_core::config::Config;
use vf_core::events::EventBus;
use vf_pipeline::Pipeline;

use crate::context::AppContext;

pub use router::build_router;

/// Start the vodforge server.
///
/// Opens the database, connects the object store, requeues interrupted jobs,
/// starts the worker pool and serves HTTP until a shutdown signal arrives.
/// Workers finish their current job before the function returns.
pub async fn start(config: Config) -> vf_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let db_path = &config.server.db_path;
    let existed = db_path.exists();
    let db = vf_db::init_pool(db_path)?;
    if existed {
        tracing::info!("Database opened (existing) at {}", db_path.display());
    } else {
        tracing::info!("Database created (new) at {}", db_path.display());
    }

    let tools = Arc::new(ToolRegistry::discover(&config.tools));
    for info in tools.check_all() {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}; processing jobs will fail", info.name);
        }
    }

    let store = vf_store::from_config(&config.storage).await?;
    tracing::info!(
        backend = %config.storage.backend,
        bucket = store.bucket(),
        "object store ready"
    );

    let transcoder = Arc::new(FfmpegTranscoder::new(
        (*tools).clone(),
        config.transcode.clone(),
    ));
    let event_bus = Arc::new(EventBus::default());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| vf_core::Error::Internal(format!("Invalid server address: {e}")))?;

    let pipeline = Arc::new(Pipeline::new(
        Arc::new(config),
        db,
        store,
        transcoder,
        event_bus,
    ));
    let ctx = AppContext::new(Arc::clone(&pipeline), tools);

    let cancel = CancellationToken::new();
    let workers = pipeline.start_workers(cancel.clone())?;

    let app = build_router(ctx);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| vf_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;
    tracing::info!("Starting server on {addr}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await;

    // Stop the workers whether the server exited cleanly or not.
    cancel.cancel();
    workers.join().await;

    served.map_err(|e| vf_core::Error::Internal(format!("server error: {e}")))?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM) or cancellation.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
