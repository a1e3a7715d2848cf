//! Route definitions for the object store.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::storage;
use crate::state::AppState;

/// Routes mounted at `/storage`.
///
/// ```text
/// POST   /upload-grants         -> create_upload_grant
/// PUT    /objects/{*key}        -> put_object (upload grant)
/// GET    /objects/{*key}        -> get_object (download grant)
/// ```
pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/upload-grants", post(storage::create_upload_grant))
        .route(
            "/objects/{*key}",
            get(storage::get_object)
                .put(storage::put_object)
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
}
