use std::sync::Arc;

use docflow_core::storage::ObjectStore;
use docflow_worker::{JobStatusStore, WorkQueue};

use crate::config::ServerConfig;
use crate::correlation::CorrelationRegistry;
use crate::notifications::ListenerStatus;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Live connections (browser clients).
    pub ws_manager: Arc<WsManager>,
    /// Job-to-client bindings; shared with `ws_manager` and the listener.
    pub registry: Arc<CorrelationRegistry>,
    pub queue: Arc<dyn WorkQueue>,
    pub statuses: Arc<dyn JobStatusStore>,
    pub store: Arc<dyn ObjectStore>,
    /// Liveness of the completion listener, reported by `/health`.
    pub listener_status: ListenerStatus,
}
