use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok` while the completion listener runs, `unhealthy` otherwise.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub listener_running: bool,
    /// Number of live connections.
    pub connections: usize,
}

/// GET /health -- 200 while the listener runs, 503 once it has died.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let listener_running = state.listener_status.is_running();
    let (code, status) = if listener_running {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            listener_running,
            connections: state.ws_manager.connection_count().await,
        }),
    )
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
