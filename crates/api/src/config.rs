use std::str::FromStr;
use std::time::Duration;

use docflow_core::job_events::COMPLETION_CHANNEL;
use docflow_core::storage::MAX_GRANT_TTL;
use docflow_worker::queue::DEFAULT_QUEUE_KEY;

/// Which transport carries jobs and completion events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusBackend {
    /// Single process: in-memory bus, queue and status store, embedded workers.
    Memory,
    /// Redis pub/sub, list queue and status keys shared with external workers.
    Redis,
}

impl FromStr for BusBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BusBackend::Memory),
            "redis" => Ok(BusBackend::Redis),
            other => Err(format!("unknown event bus backend '{other}'")),
        }
    }
}

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Bounded grace period for background tasks at shutdown (default: `10`).
    pub shutdown_timeout_secs: u64,
    /// Largest accepted document in bytes (default: 25 MiB).
    pub max_upload_bytes: usize,
    pub event_bus_backend: BusBackend,
    pub redis_url: String,
    pub completion_channel: String,
    pub work_queue_key: String,
    pub status_ttl_secs: u64,
    /// Bounded receive timeout of the completion listener.
    pub listener_recv_timeout_ms: u64,
    pub storage_dir: String,
    pub storage_signing_secret: String,
    pub grant_ttl_secs: u64,
    /// Prefix for grant URLs handed to clients.
    pub public_base_url: String,
    /// Worker tasks spawned in-process for the `memory` backend.
    pub embedded_workers: usize,
    pub heartbeat_interval_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                    |
    /// |----------------------------|----------------------------|
    /// | `HOST`                     | `0.0.0.0`                  |
    /// | `PORT`                     | `8000`                     |
    /// | `CORS_ORIGINS`             | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`     | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`    | `10`                       |
    /// | `MAX_UPLOAD_BYTES`         | `26214400`                 |
    /// | `EVENT_BUS_BACKEND`        | `memory`                   |
    /// | `REDIS_URL`                | `redis://127.0.0.1:6379`   |
    /// | `COMPLETION_CHANNEL`       | `task_complete`            |
    /// | `WORK_QUEUE_KEY`           | `docflow:jobs`             |
    /// | `STATUS_TTL_SECS`          | `86400`                    |
    /// | `LISTENER_RECV_TIMEOUT_MS` | `1000`                     |
    /// | `STORAGE_DIR`              | `./data`                   |
    /// | `STORAGE_SIGNING_SECRET`   | development secret         |
    /// | `GRANT_TTL_SECS`           | `900`                      |
    /// | `PUBLIC_BASE_URL`          | `http://localhost:8000`    |
    /// | `EMBEDDED_WORKERS`         | `2`                        |
    /// | `HEARTBEAT_INTERVAL_SECS`  | `30`                       |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let max_upload_bytes: usize = std::env::var("MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| "26214400".into())
            .parse()
            .expect("MAX_UPLOAD_BYTES must be a valid usize");

        let event_bus_backend: BusBackend = std::env::var("EVENT_BUS_BACKEND")
            .unwrap_or_else(|_| "memory".into())
            .parse()
            .expect("EVENT_BUS_BACKEND must be 'memory' or 'redis'");

        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let completion_channel =
            std::env::var("COMPLETION_CHANNEL").unwrap_or_else(|_| COMPLETION_CHANNEL.into());
        let work_queue_key =
            std::env::var("WORK_QUEUE_KEY").unwrap_or_else(|_| DEFAULT_QUEUE_KEY.into());

        let status_ttl_secs: u64 = std::env::var("STATUS_TTL_SECS")
            .unwrap_or_else(|_| "86400".into())
            .parse()
            .expect("STATUS_TTL_SECS must be a valid u64");

        let listener_recv_timeout_ms: u64 = std::env::var("LISTENER_RECV_TIMEOUT_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("LISTENER_RECV_TIMEOUT_MS must be a valid u64");

        let storage_dir = std::env::var("STORAGE_DIR").unwrap_or_else(|_| "./data".into());
        let storage_signing_secret = std::env::var("STORAGE_SIGNING_SECRET")
            .unwrap_or_else(|_| "dev-storage-secret-change-me".into());

        let grant_ttl_secs: u64 = std::env::var("GRANT_TTL_SECS")
            .unwrap_or_else(|_| "900".into())
            .parse()
            .expect("GRANT_TTL_SECS must be a valid u64");
        assert!(
            grant_ttl_secs <= MAX_GRANT_TTL.as_secs(),
            "GRANT_TTL_SECS must be at most {}",
            MAX_GRANT_TTL.as_secs()
        );

        let public_base_url =
            std::env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:8000".into());

        let embedded_workers: usize = std::env::var("EMBEDDED_WORKERS")
            .unwrap_or_else(|_| "2".into())
            .parse()
            .expect("EMBEDDED_WORKERS must be a valid usize");

        let heartbeat_interval_secs: u64 = std::env::var("HEARTBEAT_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("HEARTBEAT_INTERVAL_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            max_upload_bytes,
            event_bus_backend,
            redis_url,
            completion_channel,
            work_queue_key,
            status_ttl_secs,
            listener_recv_timeout_ms,
            storage_dir,
            storage_signing_secret,
            grant_ttl_secs,
            public_base_url,
            embedded_workers,
            heartbeat_interval_secs,
        }
    }

    pub fn listener_recv_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_recv_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
