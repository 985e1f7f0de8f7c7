//! Error-to-HTTP response conversion.
//!
//! Route handlers return `Result<T, AppError>`; `?` lifts any
//! [`vf_core::Error`] into it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: vf_core::Error,
}

impl AppError {
    pub fn new(inner: vf_core::Error) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &vf_core::Error {
        &self.inner
    }
}

impl From<vf_core::Error> for AppError {
    fn from(e: vf_core::Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.inner, "server error in API handler");
        } else {
            tracing::debug!(status = %status, error = %self.inner, "request rejected");
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": self.inner.code(),
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Parse a path segment into a typed id, rejecting garbage with 400.
pub fn parse_id<T: std::str::FromStr>(raw: &str, entity: &str) -> Result<T, AppError> {
    raw.parse()
        .map_err(|_| vf_core::Error::Validation(format!("invalid {entity} id: {raw}")).into())
}
