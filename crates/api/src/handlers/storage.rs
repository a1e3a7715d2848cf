//! Handlers for the local object store's signed grant URLs.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use docflow_core::error::CoreError;
use docflow_core::storage::{sanitize_filename, Grant, GrantMethod, UPLOADS_PREFIX};
use serde::Deserialize;
use validator::Validate;

use crate::error::AppResult;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct UploadGrantRequest {
    #[validate(length(min = 1, max = 255))]
    pub filename: String,
}

/// Query string carried by every grant URL.
#[derive(Debug, Deserialize)]
pub struct GrantQuery {
    pub expires: i64,
    pub signature: String,
}

/// POST /api/v1/storage/upload-grants
pub async fn create_upload_grant(
    State(state): State<AppState>,
    Json(body): Json<UploadGrantRequest>,
) -> AppResult<(StatusCode, Json<Grant>)> {
    body.validate()
        .map_err(|e| CoreError::Validation(e.to_string()))?;

    let key = format!(
        "{UPLOADS_PREFIX}/{}/{}",
        uuid::Uuid::new_v4(),
        sanitize_filename(&body.filename)
    );
    let grant = state.store.put_grant(&key)?;
    tracing::debug!(%key, expires_at = %grant.expires_at, "Issued upload grant");

    Ok((StatusCode::CREATED, Json(grant)))
}

/// PUT /api/v1/storage/objects/{*key}
pub async fn put_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(grant): Query<GrantQuery>,
    body: Bytes,
) -> AppResult<StatusCode> {
    state
        .store
        .verify_grant(GrantMethod::Put, &key, grant.expires, &grant.signature)?;
    if body.len() > state.config.max_upload_bytes {
        return Err(CoreError::Validation(format!(
            "Object exceeds {} bytes",
            state.config.max_upload_bytes
        ))
        .into());
    }

    state.store.write(&key, &body).await?;
    tracing::info!(%key, size = body.len(), "Object uploaded through grant");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/storage/objects/{*key}
pub async fn get_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(grant): Query<GrantQuery>,
) -> AppResult<impl IntoResponse> {
    state
        .store
        .verify_grant(GrantMethod::Get, &key, grant.expires, &grant.signature)?;
    let bytes = state.store.read(&key).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes))
}
