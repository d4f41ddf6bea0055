use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use lavoro_shared::Envelope;

/// Error taxonomy for the chat API.
///
/// Validation and authorization failures are terminal for the operation and
/// surfaced verbatim; internal failures are logged and replaced with a safe
/// generic message.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Authorization(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "Internal server error".to_string()
            }
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Envelope::<()>::err(message);
        (status, axum::Json(body)).into_response()
    }
}

/// Map a lock-poisoned database mutex to an internal error.
pub fn lock_err<T>(_: T) -> ApiError {
    ApiError::Internal("database lock poisoned".to_string())
}

/// Map a spawn_blocking join failure to an internal error.
pub fn join_err(e: tokio::task::JoinError) -> ApiError {
    ApiError::Internal(format!("blocking task failed: {e}"))
}
