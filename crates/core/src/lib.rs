//! Docflow core domain types.
//!
//! Zero internal dependencies: everything here is shared by the API front
//! end, the event bus and the worker processes.
//!
//! - [`types`]: opaque identifiers (`JobId`, `ClientId`, `UploadId`).
//! - [`job_events`]: wire schema for completion events, notifications and
//!   live-channel frames.
//! - [`job_status`]: job status records backing the poll path.
//! - [`storage`]: object-storage capability with expiring grants.

pub mod error;
pub mod job_events;
pub mod job_status;
pub mod storage;
pub mod types;
