//! Wire schema for job completion (event bus) and the live channel.
//!
//! Workers publish a [`CompletionEvent`] on [`COMPLETION_CHANNEL`]; the
//! front end turns it into a [`Notification`] for the interested client.
//! Clients talk to the front end with [`InterestRequest`] frames and receive
//! [`ServerFrame`]s.

use serde::{Deserialize, Serialize};

use crate::job_status::JobStatusView;
use crate::types::{JobId, UploadId};

/// Default pub/sub channel carrying completion events.
pub const COMPLETION_CHANNEL: &str = "task_complete";

/// Live-channel error code: the client id already has an open connection.
pub const ERR_DUPLICATE_CLIENT: &str = "DUPLICATE_CLIENT";

/// Live-channel error code: an inbound frame could not be understood.
pub const ERR_PROTOCOL: &str = "PROTOCOL_ERROR";

// ---------------------------------------------------------------------------
// Completion events
// ---------------------------------------------------------------------------

/// Terminal outcome reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Completed,
    Failed,
}

/// One-time message a worker emits when a job reaches a terminal state.
///
/// Wire format: `{"task_id": "...", "status": "completed"|"failed",
/// "result"?: "...", "error"?: "..."}`. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    #[serde(rename = "task_id")]
    pub job_id: JobId,
    pub status: CompletionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A message on the event bus or live channel did not match its schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("message carries an empty job id")]
    EmptyJobId,
}

impl CompletionEvent {
    /// Successful completion carrying an optional result reference.
    pub fn completed(job_id: JobId, result: Option<String>) -> Self {
        Self {
            job_id,
            status: CompletionStatus::Completed,
            result,
            error: None,
        }
    }

    /// Failed completion carrying an error message.
    pub fn failed(job_id: JobId, error: impl Into<String>) -> Self {
        Self {
            job_id,
            status: CompletionStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Parse and validate a raw bus payload.
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        let event: Self = serde_json::from_str(raw)?;
        if event.job_id.as_str().trim().is_empty() {
            return Err(SchemaError::EmptyJobId);
        }
        Ok(event)
    }

    /// Serialize to the bus wire format.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Notifications and live-channel frames
// ---------------------------------------------------------------------------

/// Delivered once per job to at most one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub job_id: JobId,
    pub status: CompletionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<UploadId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Notification {
    pub fn from_event(event: CompletionEvent, upload_id: Option<UploadId>) -> Self {
        Self {
            job_id: event.job_id,
            status: event.status,
            upload_id,
            result: event.result,
            error: event.error,
        }
    }
}

/// Inbound live-channel frame: "tell me when this job finishes".
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InterestRequest {
    #[serde(alias = "task_id")]
    pub job_id: JobId,
    #[serde(default)]
    pub upload_id: Option<UploadId>,
}

impl InterestRequest {
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        let request: Self = serde_json::from_str(raw)?;
        if request.job_id.as_str().trim().is_empty() {
            return Err(SchemaError::EmptyJobId);
        }
        Ok(request)
    }
}

/// Outbound live-channel frame, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Push for a finished job (at most once per job).
    Notification(Notification),
    /// Acknowledges an interest registration.
    Registered { job_id: JobId },
    /// Poll-equivalent answer for a job this instance already resolved.
    Status(JobStatusView),
    /// Structured error; the connection may be closed right after.
    Error { code: String, message: String },
}

impl ServerFrame {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
