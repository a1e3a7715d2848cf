use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use docflow_core::storage::{LocalObjectStore, ObjectStore};
use docflow_events::{EventBus, EventSubscriber, RedisEventBus};
use docflow_worker::{
    JobStatusStore, MemoryQueue, MemoryStatusStore, RedisQueue, RedisStatusStore, TextExtractor,
    WorkQueue, WorkerContext, WorkerPool, WorkerSettings,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docflow_api::config::{BusBackend, ServerConfig};
use docflow_api::correlation::CorrelationRegistry;
use docflow_api::notifications::{CompletionListener, ListenerHandle, ListenerStatus};
use docflow_api::router::build_app_router;
use docflow_api::state::AppState;
use docflow_api::ws;

/// Queue, status store and completion subscription for the chosen backend.
struct Backends {
    queue: Arc<dyn WorkQueue>,
    statuses: Arc<dyn JobStatusStore>,
    subscriber: Box<dyn EventSubscriber>,
    /// Present only for the in-memory backend.
    workers: Option<WorkerPool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        backend = ?config.event_bus_backend,
        "Loaded server configuration",
    );

    // --- Object store ---
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(
        &config.storage_dir,
        &config.storage_signing_secret,
        config.public_base_url.clone(),
        Duration::from_secs(config.grant_ttl_secs),
    ));

    // --- Queue, status store, event bus ---
    let backends = match config.event_bus_backend {
        BusBackend::Memory => memory_backends(&config, Arc::clone(&store)),
        BusBackend::Redis => redis_backends(&config).await?,
    };

    // --- Connections and correlation ---
    let registry = Arc::new(CorrelationRegistry::new());
    let ws_manager = Arc::new(ws::WsManager::new(Arc::clone(&registry)));
    let heartbeat_handle = ws::start_heartbeat(
        Arc::clone(&ws_manager),
        Duration::from_secs(config.heartbeat_interval_secs),
    );

    // --- Completion listener ---
    let listener_status = ListenerStatus::new();
    let listener = ListenerHandle::spawn(
        CompletionListener::new(Arc::clone(&ws_manager), config.listener_recv_timeout()),
        backends.subscriber,
        listener_status.clone(),
    );
    let listener_fatal = listener.fatal();

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        ws_manager: Arc::clone(&ws_manager),
        registry,
        queue: backends.queue,
        statuses: backends.statuses,
        store,
        listener_status,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let host: IpAddr = config.host.parse().context("Invalid HOST address")?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let tcp = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(tcp, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                () = shutdown_signal() => {}
                () = listener_fatal.cancelled() => {
                    tracing::error!("Completion listener died, shutting down");
                }
            }
        })
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    let listener_result = listener.shutdown(config.shutdown_timeout()).await;
    tracing::info!("Completion listener stopped");

    if let Some(workers) = backends.workers {
        workers.shutdown(config.shutdown_timeout()).await;
    }

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    heartbeat_handle.abort();
    tracing::info!("Heartbeat task stopped");

    listener_result.context("Completion listener failed")?;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Single-process deployment: everything in memory, workers embedded.
fn memory_backends(config: &ServerConfig, store: Arc<dyn ObjectStore>) -> Backends {
    let bus = Arc::new(EventBus::default());
    let queue = Arc::new(MemoryQueue::new());
    let statuses = Arc::new(MemoryStatusStore::new());
    // Subscribe before any worker can publish.
    let subscriber = Box::new(bus.subscribe());

    let ctx = Arc::new(WorkerContext {
        queue: queue.clone(),
        statuses: statuses.clone(),
        store,
        publisher: bus,
        processor: Arc::new(TextExtractor),
        settings: WorkerSettings::default(),
    });
    let workers = WorkerPool::spawn(ctx, config.embedded_workers, CancellationToken::new());
    tracing::info!(workers = workers.size(), "In-memory backend with embedded workers");

    Backends {
        queue,
        statuses,
        subscriber,
        workers: Some(workers),
    }
}

/// Multi-process deployment: Redis shared with `docflow-worker` processes.
async fn redis_backends(config: &ServerConfig) -> anyhow::Result<Backends> {
    let queue = RedisQueue::connect(&config.redis_url, config.work_queue_key.clone())
        .await
        .context("Failed to connect work queue")?;
    let statuses = RedisStatusStore::connect(
        &config.redis_url,
        Duration::from_secs(config.status_ttl_secs),
    )
    .await
    .context("Failed to connect status store")?;
    let bus = RedisEventBus::new(&config.redis_url, config.completion_channel.clone())?;
    let subscriber = bus
        .subscribe()
        .await
        .context("Failed to subscribe to completion channel")?;
    tracing::info!(channel = %bus.channel(), "Redis backend connected");

    Ok(Backends {
        queue: Arc::new(queue),
        statuses: Arc::new(statuses),
        subscriber: Box::new(subscriber),
        workers: None,
    })
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "docflow_api=debug,tower_http=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
