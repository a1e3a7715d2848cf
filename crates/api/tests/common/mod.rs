#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use docflow_api::config::{BusBackend, ServerConfig};
use docflow_api::correlation::CorrelationRegistry;
use docflow_api::notifications::{CompletionListener, ListenerHandle, ListenerStatus};
use docflow_api::router::build_app_router;
use docflow_api::state::AppState;
use docflow_api::ws::WsManager;
use docflow_core::storage::LocalObjectStore;
use docflow_events::EventBus;
use docflow_worker::{MemoryQueue, MemoryStatusStore, TextExtractor, Worker, WorkerContext, WorkerSettings};

pub const TEST_SECRET: &str = "test-signing-secret";
pub const BOUNDARY: &str = "docflow-test-boundary";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        max_upload_bytes: 1024 * 1024,
        event_bus_backend: BusBackend::Memory,
        redis_url: "redis://127.0.0.1:6379".to_string(),
        completion_channel: "task_complete".to_string(),
        work_queue_key: "docflow:jobs".to_string(),
        status_ttl_secs: 60,
        listener_recv_timeout_ms: 50,
        storage_dir: String::new(),
        storage_signing_secret: TEST_SECRET.to_string(),
        grant_ttl_secs: 60,
        public_base_url: "http://localhost:8000".to_string(),
        embedded_workers: 0,
        heartbeat_interval_secs: 30,
    }
}

/// Everything a test needs: in-memory backends, a running listener, and
/// direct handles on the pieces behind the router.
pub struct TestContext {
    pub dir: tempfile::TempDir,
    pub config: ServerConfig,
    pub state: AppState,
    pub bus: Arc<EventBus>,
    pub queue: Arc<MemoryQueue>,
    pub statuses: Arc<MemoryStatusStore>,
    pub store: Arc<LocalObjectStore>,
    pub listener: Option<ListenerHandle>,
}

impl TestContext {
    /// Build the context and start the completion listener on the in-memory bus.
    pub fn start() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = test_config();
        config.storage_dir = dir.path().display().to_string();

        let store = Arc::new(LocalObjectStore::new(
            dir.path(),
            TEST_SECRET,
            config.public_base_url.clone(),
            Duration::from_secs(config.grant_ttl_secs),
        ));
        let bus = Arc::new(EventBus::default());
        let queue = Arc::new(MemoryQueue::new());
        let statuses = Arc::new(MemoryStatusStore::new());
        let registry = Arc::new(CorrelationRegistry::new());
        let ws_manager = Arc::new(WsManager::new(Arc::clone(&registry)));
        let listener_status = ListenerStatus::new();

        let listener = ListenerHandle::spawn(
            CompletionListener::new(Arc::clone(&ws_manager), config.listener_recv_timeout()),
            Box::new(bus.subscribe()),
            listener_status.clone(),
        );

        let state = AppState {
            config: Arc::new(config.clone()),
            ws_manager,
            registry,
            queue: queue.clone(),
            statuses: statuses.clone(),
            store: store.clone(),
            listener_status,
        };

        Self {
            dir,
            config,
            state,
            bus,
            queue,
            statuses,
            store,
            listener: Some(listener),
        }
    }

    /// Build the full application router with all middleware layers.
    pub fn app(&self) -> Router {
        build_app_router(self.state.clone(), &self.config)
    }

    /// A worker wired to the same queue, stores and bus as the app.
    pub fn worker(&self) -> Worker {
        let ctx = Arc::new(WorkerContext {
            queue: self.queue.clone(),
            statuses: self.statuses.clone(),
            store: self.store.clone(),
            publisher: self.bus.clone(),
            processor: Arc::new(TextExtractor),
            settings: WorkerSettings::default(),
        });
        Worker::new(0, ctx)
    }

    /// Serve the app on an ephemeral port; returns its address.
    pub async fn serve(&self) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let app = self.app();
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server");
        });
        addr
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(app: Router, request: Request<Body>) -> Response<Body> {
    app.oneshot(request).await.expect("request should complete")
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn post_json(app: Router, uri: &str, json: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap();
    send(app, request).await
}

/// POST a multipart form with an optional file part and optional `upload_id`.
pub async fn post_multipart(
    app: Router,
    uri: &str,
    file: Option<(&str, &[u8])>,
    upload_id: Option<&str>,
) -> Response<Body> {
    let mut body: Vec<u8> = Vec::new();
    if let Some((filename, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    if let Some(upload_id) = upload_id {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"upload_id\"\r\n\r\n{upload_id}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    send(app, request).await
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).expect("response body should be JSON")
}

/// Path and query of a grant URL, for replaying it against the in-process app.
pub fn grant_path(url: &str) -> String {
    let after_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    match after_scheme.find('/') {
        Some(idx) => after_scheme[idx..].to_string(),
        None => "/".to_string(),
    }
}
