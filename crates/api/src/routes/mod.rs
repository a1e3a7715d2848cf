pub mod health;
pub mod jobs;
pub mod storage;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /ws/{client_id}                      live notification channel (WebSocket)
///
/// /jobs                                submit (multipart upload)
/// /jobs/by-reference                   submit (existing object key)
/// /status/{job_id}                     poll job status
/// /result/{job_id}                     download produced text
///
/// /storage/upload-grants               issue upload grant
/// /storage/objects/{*key}              grant-authorised PUT / GET
/// ```
pub fn api_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/ws/{client_id}", get(ws::ws_handler))
        .merge(jobs::router(max_upload_bytes))
        .nest("/storage", storage::router(max_upload_bytes))
}
