use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use service::errors::StorageError;
use thiserror::Error;
use tracing::error;

/// HTTP-facing error rendered as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self { Self::new(StatusCode::BAD_REQUEST, message) }

    pub fn internal() -> Self { Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error") }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({"error": self.message}))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match &e {
            StorageError::NotFound => ApiError::new(StatusCode::NOT_FOUND, "not found"),
            StorageError::InvalidPosition | StorageError::UnexpectedWhence(_) => ApiError::bad_request(e.to_string()),
            StorageError::Cancelled => ApiError::new(StatusCode::REQUEST_TIMEOUT, "request cancelled"),
            StorageError::EndOfStream | StorageError::ClosedResource | StorageError::Unknown(_) => {
                // cause stays in the log, not in the response
                error!(error = %e, code = e.code(), "storage failure");
                ApiError::internal()
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("runtime check failed: {0}")]
    Runtime(String),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
}
