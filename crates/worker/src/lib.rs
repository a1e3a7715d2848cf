//! Docflow worker execution.
//!
//! Workers pull [`queue::JobRequest`]s, run the [`processor::DocumentProcessor`],
//! record the terminal status and publish exactly one completion event per
//! job. The API binary embeds a [`worker::WorkerPool`] for single-process
//! deployments; the `docflow-worker` binary runs one against Redis.

pub mod backoff;
pub mod config;
pub mod processor;
pub mod queue;
pub mod status;
pub mod worker;

pub use processor::{DocumentProcessor, ProcessingError, TextExtractor};
pub use queue::{JobRequest, MemoryQueue, QueueError, RedisQueue, WorkQueue};
pub use status::{JobStatusStore, MemoryStatusStore, RedisStatusStore, StatusStoreError};
pub use worker::{Worker, WorkerContext, WorkerPool, WorkerSettings};
