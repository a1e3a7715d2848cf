//! Route definitions for job submission and polling.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Room for multipart boundaries and the `upload_id` field.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Routes mounted at `/api/v1`.
///
/// ```text
/// POST   /jobs                  -> submit_upload (multipart)
/// POST   /jobs/by-reference     -> submit_by_reference
/// GET    /status/{job_id}       -> get_status
/// GET    /result/{job_id}       -> get_result
/// ```
pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/jobs",
            post(jobs::submit_upload)
                .layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_OVERHEAD)),
        )
        .route("/jobs/by-reference", post(jobs::submit_by_reference))
        .route("/status/{job_id}", get(jobs::get_status))
        .route("/result/{job_id}", get(jobs::get_result))
}
