//! Job status store backing the synchronous poll path.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use docflow_core::job_status::JobRecord;
use docflow_core::types::JobId;
use tokio::sync::RwLock;

/// Key prefix for status records in Redis.
pub const STATUS_KEY_PREFIX: &str = "docflow:job:";

#[derive(Debug, thiserror::Error)]
pub enum StatusStoreError {
    #[error("Status store backend error: {0}")]
    Backend(String),

    #[error("Corrupt status record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl From<redis::RedisError> for StatusStoreError {
    fn from(err: redis::RedisError) -> Self {
        StatusStoreError::Backend(err.to_string())
    }
}

#[async_trait]
pub trait JobStatusStore: Send + Sync {
    /// Insert or replace the record for `record.job_id`.
    async fn put(&self, record: &JobRecord) -> Result<(), StatusStoreError>;

    async fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>, StatusStoreError>;
}

/// Process-local store used with the in-memory bus.
#[derive(Default)]
pub struct MemoryStatusStore {
    records: RwLock<HashMap<JobId, JobRecord>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStatusStore for MemoryStatusStore {
    async fn put(&self, record: &JobRecord) -> Result<(), StatusStoreError> {
        self.records
            .write()
            .await
            .insert(record.job_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>, StatusStoreError> {
        Ok(self.records.read().await.get(job_id).cloned())
    }
}

/// Redis string keys with a TTL, shared by the API and every worker process.
pub struct RedisStatusStore {
    conn: redis::aio::MultiplexedConnection,
    ttl: Duration,
}

impl RedisStatusStore {
    pub async fn connect(url: &str, ttl: Duration) -> Result<Self, StatusStoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn, ttl })
    }

    fn key(job_id: &JobId) -> String {
        format!("{STATUS_KEY_PREFIX}{job_id}")
    }
}

#[async_trait]
impl JobStatusStore for RedisStatusStore {
    async fn put(&self, record: &JobRecord) -> Result<(), StatusStoreError> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(Self::key(&record.job_id))
            .arg(payload)
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>, StatusStoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::key(job_id))
            .query_async(&mut conn)
            .await?;
        raw.map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(Into::into)
    }
}
