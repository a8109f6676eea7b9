//! Shared HTTP error type for every service in the platform.
//!
//! Mirrors the error-kind taxonomy in the platform error handling design:
//! validation, conflict, not-found, dependency-unavailable, storage, and
//! unexpected errors, each mapped to a fixed HTTP status and rendered as
//! `{"detail": ..., "request_id": ...}`.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

/// A uniform API error carrying enough information to render the
/// `{"detail", "request_id"}` body required by every service.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 422 — rejected input.
    #[error("{0}")]
    Validation(String),
    /// 409 — illegal state transition or uniqueness violation.
    #[error("{0}")]
    Conflict(String),
    /// 404 — entity does not exist.
    #[error("{0}")]
    NotFound(String),
    /// 400 — malformed identifier or request.
    #[error("{0}")]
    BadRequest(String),
    /// 503 — persistence unreachable after the retry budget was exhausted.
    #[error("{0}")]
    Unavailable(String),
    /// 500 — anything not otherwise classified.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Attach a request id, producing the response body the platform
    /// contract requires on every error.
    pub fn into_response_with_request_id(self, request_id: &str) -> axum::response::Response {
        let status = self.status();
        if matches!(self, ApiError::Internal(_)) {
            tracing::error!(request_id, error = %self, "unexpected error");
        } else {
            tracing::warn!(request_id, status = status.as_u16(), error = %self, "request error");
        }
        let body = ErrorBody {
            detail: self.to_string(),
            request_id: request_id.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Wire shape of every error response in the platform.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
    pub request_id: String,
}

/// Fallback `IntoResponse` for call sites that have no request id handy
/// (e.g. cross-service client errors surfaced directly to logs/metrics).
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        self.into_response_with_request_id("unknown")
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
