//! Worker loop and pool.
//!
//! Every dequeued job ends in exactly one published [`CompletionEvent`],
//! whether the processor succeeds, returns an error or panics. The terminal
//! status record is written before the event goes out.

use std::sync::Arc;
use std::time::Duration;

use docflow_core::job_events::CompletionEvent;
use docflow_core::job_status::JobRecord;
use docflow_core::storage::ObjectStore;
use docflow_events::{publish_completion, BusError, EventPublisher};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::{next_delay, sleep_or_cancel, BackoffConfig};
use crate::processor::{DocumentProcessor, ProcessingError};
use crate::queue::{JobRequest, QueueError, WorkQueue};
use crate::status::JobStatusStore;

/// Default bounded wait for each dequeue call.
const DEFAULT_DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of publish attempts per completion event.
const DEFAULT_PUBLISH_ATTEMPTS: u32 = 5;

/// Tunables for [`Worker`].
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub dequeue_timeout: Duration,
    pub publish_max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            dequeue_timeout: DEFAULT_DEQUEUE_TIMEOUT,
            publish_max_attempts: DEFAULT_PUBLISH_ATTEMPTS,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Collaborators shared by every worker in a pool.
pub struct WorkerContext {
    pub queue: Arc<dyn WorkQueue>,
    pub statuses: Arc<dyn JobStatusStore>,
    pub store: Arc<dyn ObjectStore>,
    pub publisher: Arc<dyn EventPublisher>,
    pub processor: Arc<dyn DocumentProcessor>,
    pub settings: WorkerSettings,
}

/// One queue consumer.
pub struct Worker {
    id: usize,
    ctx: Arc<WorkerContext>,
}

impl Worker {
    pub fn new(id: usize, ctx: Arc<WorkerContext>) -> Self {
        Self { id, ctx }
    }

    /// Pull and handle jobs until `cancel` fires.
    ///
    /// Dequeue is never raced against cancellation, so a popped job is
    /// always handled to completion; cancellation is observed between jobs
    /// and at every dequeue timeout.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(worker = self.id, "Worker started");
        let mut backoff = self.ctx.settings.backoff.initial_delay;

        while !cancel.is_cancelled() {
            match self.ctx.queue.dequeue(self.ctx.settings.dequeue_timeout).await {
                Ok(Some(job)) => {
                    backoff = self.ctx.settings.backoff.initial_delay;
                    self.handle(job).await;
                }
                Ok(None) => {}
                Err(QueueError::Malformed(e)) => {
                    tracing::warn!(worker = self.id, error = %e, "Dropping malformed queued job");
                }
                Err(QueueError::Closed) => {
                    tracing::info!(worker = self.id, "Work queue closed");
                    break;
                }
                Err(e) => {
                    tracing::error!(
                        worker = self.id,
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "Dequeue failed",
                    );
                    if !sleep_or_cancel(backoff, &cancel).await {
                        break;
                    }
                    backoff = next_delay(backoff, &self.ctx.settings.backoff);
                }
            }
        }

        tracing::info!(worker = self.id, "Worker stopped");
    }

    /// Process one job and publish its completion event.
    ///
    /// Returns the event that was (or was attempted to be) published.
    pub async fn handle(&self, job: JobRequest) -> CompletionEvent {
        let job_id = job.job_id.clone();
        tracing::info!(worker = self.id, %job_id, input_key = %job.input_key, "Job started");

        let event = match self.execute(&job).await {
            Ok(output_key) => {
                tracing::info!(worker = self.id, %job_id, %output_key, "Job finished");
                CompletionEvent::completed(job_id.clone(), Some(output_key))
            }
            Err(e) => {
                tracing::warn!(worker = self.id, %job_id, error = %e, "Job failed");
                CompletionEvent::failed(job_id.clone(), e.to_string())
            }
        };

        self.record_terminal(&job, &event).await;

        if let Err(e) = self.publish_with_retry(&event).await {
            tracing::error!(
                worker = self.id,
                %job_id,
                error = %e,
                "Giving up on completion event; status record remains the source of truth",
            );
        }

        event
    }

    async fn execute(&self, job: &JobRequest) -> Result<String, ProcessingError> {
        let bytes = self
            .ctx
            .store
            .read(&job.input_key)
            .await
            .map_err(|e| ProcessingError::Input(e.to_string()))?;

        let filename = job
            .input_key
            .rsplit('/')
            .next()
            .unwrap_or(&job.input_key)
            .to_string();

        let processor = Arc::clone(&self.ctx.processor);
        let text = tokio::spawn(async move { processor.process(&filename, bytes).await })
            .await
            .map_err(|e| {
                if e.is_panic() {
                    ProcessingError::Panicked(panic_message(e.into_panic()))
                } else {
                    ProcessingError::Failed(e.to_string())
                }
            })??;

        self.ctx
            .store
            .write(&job.output_key, text.as_bytes())
            .await
            .map_err(|e| ProcessingError::Output(e.to_string()))?;

        Ok(job.output_key.clone())
    }

    async fn record_terminal(&self, job: &JobRequest, event: &CompletionEvent) {
        let existing = match self.ctx.statuses.get(&job.job_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(job_id = %job.job_id, error = %e, "Failed to read status record");
                None
            }
        };
        let base = existing.unwrap_or_else(|| JobRecord {
            submitted_at: job.submitted_at,
            ..JobRecord::processing(
                job.job_id.clone(),
                job.input_key.clone(),
                job.upload_id.clone(),
            )
        });

        if let Err(e) = self.ctx.statuses.put(&base.finish(event)).await {
            tracing::error!(job_id = %job.job_id, error = %e, "Failed to write terminal status");
        }
    }

    async fn publish_with_retry(&self, event: &CompletionEvent) -> Result<(), BusError> {
        let settings = &self.ctx.settings;
        let attempts = settings.publish_max_attempts.max(1);
        let mut delay = settings.backoff.initial_delay;

        for attempt in 1..=attempts {
            match publish_completion(self.ctx.publisher.as_ref(), event).await {
                Ok(()) => {
                    tracing::debug!(job_id = %event.job_id, attempt, "Completion event published");
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        job_id = %event.job_id,
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Completion publish failed, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    delay = next_delay(delay, &settings.backoff);
                }
                Err(e) => return Err(e),
            }
        }

        Err(BusError::Transient("no publish attempts made".into()))
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A fixed set of [`Worker`]s sharing one cancellation token.
pub struct WorkerPool {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(ctx: Arc<WorkerContext>, concurrency: usize, cancel: CancellationToken) -> Self {
        let handles = (0..concurrency.max(1))
            .map(|id| {
                let worker = Worker::new(id, Arc::clone(&ctx));
                let cancel = cancel.clone();
                tokio::spawn(async move { worker.run(cancel).await })
            })
            .collect::<Vec<_>>();

        tracing::info!(workers = handles.len(), "Worker pool started");
        Self { cancel, handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Cancel all workers and wait up to `grace` for each to finish.
    pub async fn shutdown(self, grace: Duration) {
        self.cancel.cancel();
        for (id, handle) in self.handles.into_iter().enumerate() {
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::warn!(worker = id, "Worker did not stop within grace period");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}
