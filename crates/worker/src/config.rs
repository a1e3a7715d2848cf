use std::time::Duration;

use docflow_core::job_events::COMPLETION_CHANNEL;
use docflow_core::storage::MAX_GRANT_TTL;

use crate::backoff::BackoffConfig;
use crate::queue::DEFAULT_QUEUE_KEY;
use crate::worker::WorkerSettings;

/// Worker process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    pub completion_channel: String,
    pub work_queue_key: String,
    pub status_ttl_secs: u64,
    pub concurrency: usize,
    pub dequeue_timeout_secs: u64,
    pub storage_dir: String,
    pub storage_signing_secret: String,
    pub grant_ttl_secs: u64,
    pub public_base_url: String,
    pub publish_max_attempts: u32,
    /// Grace period for each worker when shutting down.
    pub shutdown_timeout_secs: u64,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                    |
    /// |--------------------------|----------------------------|
    /// | `REDIS_URL`              | `redis://127.0.0.1:6379`   |
    /// | `COMPLETION_CHANNEL`     | `task_complete`            |
    /// | `WORK_QUEUE_KEY`         | `docflow:jobs`             |
    /// | `STATUS_TTL_SECS`        | `86400`                    |
    /// | `WORKER_CONCURRENCY`     | `2`                        |
    /// | `DEQUEUE_TIMEOUT_SECS`   | `1`                        |
    /// | `STORAGE_DIR`            | `./data`                   |
    /// | `STORAGE_SIGNING_SECRET` | development secret         |
    /// | `GRANT_TTL_SECS`         | `900`                      |
    /// | `PUBLIC_BASE_URL`        | `http://localhost:8000`    |
    /// | `PUBLISH_MAX_ATTEMPTS`   | `5`                        |
    /// | `SHUTDOWN_TIMEOUT_SECS`  | `10`                       |
    pub fn from_env() -> Self {
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

        let concurrency: usize = std::env::var("WORKER_CONCURRENCY")
            .unwrap_or_else(|_| "2".into())
            .parse()
            .expect("WORKER_CONCURRENCY must be a valid usize");

        let dequeue_timeout_secs: u64 = std::env::var("DEQUEUE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "1".into())
            .parse()
            .expect("DEQUEUE_TIMEOUT_SECS must be a valid u64");

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

        let publish_max_attempts: u32 = std::env::var("PUBLISH_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("PUBLISH_MAX_ATTEMPTS must be a valid u32");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        Self {
            redis_url,
            completion_channel,
            work_queue_key,
            status_ttl_secs,
            concurrency,
            dequeue_timeout_secs,
            storage_dir,
            storage_signing_secret,
            grant_ttl_secs,
            public_base_url,
            publish_max_attempts,
            shutdown_timeout_secs,
        }
    }

    pub fn settings(&self) -> WorkerSettings {
        WorkerSettings {
            dequeue_timeout: Duration::from_secs(self.dequeue_timeout_secs),
            publish_max_attempts: self.publish_max_attempts,
            backoff: BackoffConfig::default(),
        }
    }
}
