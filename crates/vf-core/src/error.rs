//! Unified error type for the vodforge pipeline.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for API handlers to derive an HTTP status code via [`Error::http_status`] and
//! for the worker to decide whether a failed job may be retried via
//! [`Error::is_retryable`].

use std::fmt;

use crate::video::VideoStatus;

/// Unified error type covering all failure modes in vodforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request data failed validation (missing fields, bad sizes, bad parts).
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested entity could not be found (or a stale upload id was used).
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "video", "upload").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// A concurrent modification won the race (optimistic version mismatch).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The requested status change is not allowed by the state machine.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current status of the video.
        from: VideoStatus,
        /// Status the caller attempted to reach.
        to: VideoStatus,
    },

    /// An object-store call failed.
    #[error("Storage error [{operation}]: {message}")]
    ExternalStorage {
        /// The store operation that failed (e.g. "complete_multipart_upload").
        operation: String,
        /// Human-readable error description.
        message: String,
    },

    /// A transcode step failed (missing outputs, bad playlist, etc.).
    #[error("Transcode error [{step}]: {message}")]
    Transcode {
        /// The pipeline step that failed.
        step: String,
        /// Human-readable error description.
        message: String,
    },

    /// An external tool (ffmpeg, ffprobe) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Media probing failed.
    #[error("Probe error: {0}")]
    Probe(String),

    /// A persistence operation failed.
    #[error("Persistence error: {source}")]
    Persistence {
        /// The underlying database error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound { .. } => 404,
            Error::Conflict(_) => 409,
            Error::InvalidTransition { .. } => 409,
            Error::ExternalStorage { .. } => 502,
            Error::Transcode { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Probe(_) => 422,
            Error::Persistence { .. } => 500,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Whether a job that failed with this error may be attempted again.
    ///
    /// Caller mistakes and state-machine rejections are permanent; storage,
    /// tool and filesystem failures may be transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ExternalStorage { .. }
                | Error::Transcode { .. }
                | Error::Tool { .. }
                | Error::Io { .. }
        )
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Persistence`].
    pub fn persistence(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Persistence {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::ExternalStorage`].
    pub fn storage(operation: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::ExternalStorage {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Transcode`].
    pub fn transcode(step: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Transcode {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Short machine-readable code used in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::NotFound { .. } => "not_found",
            Error::Conflict(_) => "conflict",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::ExternalStorage { .. } => "storage_error",
            Error::Transcode { .. } => "transcode_error",
            Error::Tool { .. } => "tool_error",
            Error::Probe(_) => "probe_error",
            Error::Persistence { .. } => "persistence_error",
            Error::Io { .. } => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
