use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use docflow_core::error::CoreError;
use docflow_core::storage::StorageError;
use docflow_worker::{QueueError, StatusStoreError};
use serde_json::json;

use crate::ws::ConnectionError;

/// Application-level error type for HTTP handlers.
///
/// Wraps domain and backend errors and implements [`IntoResponse`] to
/// produce consistent `{ "error", "code" }` JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `docflow_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    StatusStore(#[from] StatusStoreError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The job finished with an error, so there is no result to return.
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    internal()
                }
            },

            // --- Object storage ---
            AppError::Storage(err) => classify_storage_error(err),

            // --- Backends ---
            AppError::Queue(err) => {
                tracing::error!(error = %err, "Work queue error");
                unavailable("Job queue is temporarily unavailable")
            }
            AppError::StatusStore(err) => {
                tracing::error!(error = %err, "Status store error");
                unavailable("Job status is temporarily unavailable")
            }

            // --- Live channel ---
            AppError::Connection(err) => match err {
                ConnectionError::InvalidClientId(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                ConnectionError::DuplicateClient(_) => {
                    (StatusCode::CONFLICT, "DUPLICATE_CLIENT", err.to_string())
                }
            },

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::JobFailed(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "JOB_FAILED", msg.clone())
            }
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Classify an object-store error into an HTTP status, error code, and message.
///
/// - Invalid keys map to 400, missing objects to 404.
/// - Expired grants and bad signatures map to 403.
/// - I/O failures map to 503 with a sanitized message.
fn classify_storage_error(err: &StorageError) -> (StatusCode, &'static str, String) {
    match err {
        StorageError::InvalidKey(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string()),
        StorageError::NotFound(key) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Object {key} not found"),
        ),
        StorageError::GrantExpired => (StatusCode::FORBIDDEN, "GRANT_EXPIRED", err.to_string()),
        StorageError::BadSignature => (StatusCode::FORBIDDEN, "FORBIDDEN", err.to_string()),
        StorageError::Io(io) => {
            tracing::error!(error = %io, "Object store I/O error");
            unavailable("Object storage is temporarily unavailable")
        }
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

fn unavailable(message: &str) -> (StatusCode, &'static str, String) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        "SERVICE_UNAVAILABLE",
        message.to_string(),
    )
}
