//! The work queue between the front end and the worker pool.
//!
//! Scheduling and retry semantics belong to the queue backend; the front end
//! only enqueues and workers only pull with a bounded timeout.

use std::time::Duration;

use async_trait::async_trait;
use docflow_core::types::{JobId, Timestamp, UploadId};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

/// Default Redis list holding queued jobs.
pub const DEFAULT_QUEUE_KEY: &str = "docflow:jobs";

/// One queued unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: JobId,
    /// Object key of the document to process.
    pub input_key: String,
    /// Object key the produced text is written to.
    pub output_key: String,
    #[serde(default)]
    pub upload_id: Option<UploadId>,
    pub submitted_at: Timestamp,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Work queue is closed")]
    Closed,

    #[error("Work queue backend error: {0}")]
    Backend(String),

    #[error("Malformed queued job: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Backend(err.to_string())
    }
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, job: JobRequest) -> Result<(), QueueError>;

    /// Wait at most `timeout` for the next job. `Ok(None)` when none arrived.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<JobRequest>, QueueError>;
}

// ---------------------------------------------------------------------------
// In-memory queue
// ---------------------------------------------------------------------------

/// FIFO queue for single-process deployments and tests.
pub struct MemoryQueue {
    sender: mpsc::UnboundedSender<JobRequest>,
    receiver: Mutex<mpsc::UnboundedReceiver<JobRequest>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, job: JobRequest) -> Result<(), QueueError> {
        self.sender.send(job).map_err(|_| QueueError::Closed)
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<JobRequest>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        // Contending workers share the timeout budget, lock wait included.
        let mut receiver = match tokio::time::timeout_at(deadline, self.receiver.lock()).await {
            Ok(guard) => guard,
            Err(_) => return Ok(None),
        };
        match tokio::time::timeout_at(deadline, receiver.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(job)) => Ok(Some(job)),
            Ok(None) => Err(QueueError::Closed),
        }
    }
}

// ---------------------------------------------------------------------------
// Redis list queue
// ---------------------------------------------------------------------------

/// `LPUSH` / `BRPOP` queue shared by every worker process.
pub struct RedisQueue {
    conn: redis::aio::MultiplexedConnection,
    key: String,
}

impl RedisQueue {
    pub async fn connect(url: &str, key: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            key: key.into(),
        })
    }
}

#[async_trait]
impl WorkQueue for RedisQueue {
    async fn enqueue(&self, job: JobRequest) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&job)?;
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(&self.key)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<JobRequest>, QueueError> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&self.key)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;

        match popped {
            Some((_, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}
