use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use docflow_core::storage::LocalObjectStore;
use docflow_events::RedisEventBus;
use docflow_worker::config::WorkerConfig;
use docflow_worker::{RedisQueue, RedisStatusStore, TextExtractor, WorkerContext, WorkerPool};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::from_env();
    tracing::info!(
        concurrency = config.concurrency,
        queue = %config.work_queue_key,
        channel = %config.completion_channel,
        "Loaded worker configuration",
    );

    // --- Broker connections ---
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
    let publisher = bus
        .publisher()
        .await
        .context("Failed to connect completion publisher")?;
    tracing::info!("Broker connections established");

    // --- Object store ---
    let store = LocalObjectStore::new(
        &config.storage_dir,
        &config.storage_signing_secret,
        config.public_base_url.clone(),
        Duration::from_secs(config.grant_ttl_secs),
    );

    let ctx = Arc::new(WorkerContext {
        queue: Arc::new(queue),
        statuses: Arc::new(statuses),
        store: Arc::new(store),
        publisher: Arc::new(publisher),
        processor: Arc::new(TextExtractor),
        settings: config.settings(),
    });

    let cancel = CancellationToken::new();
    let pool = WorkerPool::spawn(ctx, config.concurrency, cancel);

    shutdown_signal().await;

    pool.shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "docflow_worker=debug".into());
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

/// Wait for SIGINT or SIGTERM.
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
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
