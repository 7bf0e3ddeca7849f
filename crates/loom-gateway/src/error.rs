use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Top-level HTTP error type. Maps the taxonomy in the store/session crates
/// onto status codes; the response body is always `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("session is no longer running")]
    SessionGone,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<loom_session::SessionError> for ApiError {
    fn from(e: loom_session::SessionError) -> Self {
        match e {
            loom_session::SessionError::NotFound { .. } => ApiError::NotFound,
            loom_session::SessionError::Gone => ApiError::SessionGone,
            loom_session::SessionError::Store(inner) => ApiError::Internal(inner.into()),
        }
    }
}

impl From<loom_store::StoreError> for ApiError {
    fn from(e: loom_store::StoreError) -> Self {
        match e {
            loom_store::StoreError::NotFound { .. } => ApiError::NotFound,
            other => ApiError::Internal(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::SessionGone => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}
