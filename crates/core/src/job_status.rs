//! Job status records for the synchronous poll path.
//!
//! Workers write the terminal record *before* publishing the completion
//! event, so a client that got a push and then polls sees the same state.

use serde::{Deserialize, Serialize};

use crate::job_events::{CompletionEvent, CompletionStatus};
use crate::storage::Grant;
use crate::types::{JobId, Timestamp, UploadId};

/// Poll-visible job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Processing,
    Completed,
    Error,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Processing)
    }
}

impl From<CompletionStatus> for JobState {
    fn from(status: CompletionStatus) -> Self {
        match status {
            CompletionStatus::Completed => JobState::Completed,
            CompletionStatus::Failed => JobState::Error,
        }
    }
}

/// Stored record for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub state: JobState,
    pub upload_id: Option<UploadId>,
    /// Object key of the submitted document.
    pub input_key: String,
    /// Object key of the produced artifact, once completed.
    pub output_key: Option<String>,
    pub error: Option<String>,
    pub submitted_at: Timestamp,
    pub finished_at: Option<Timestamp>,
}

impl JobRecord {
    /// A freshly submitted job.
    pub fn processing(job_id: JobId, input_key: String, upload_id: Option<UploadId>) -> Self {
        Self {
            job_id,
            state: JobState::Processing,
            upload_id,
            input_key,
            output_key: None,
            error: None,
            submitted_at: chrono::Utc::now(),
            finished_at: None,
        }
    }

    /// Apply a completion event, producing the terminal record.
    pub fn finish(mut self, event: &CompletionEvent) -> Self {
        self.state = event.status.into();
        match event.status {
            CompletionStatus::Completed => {
                self.output_key = event.result.clone();
                self.error = None;
            }
            CompletionStatus::Failed => {
                self.output_key = None;
                self.error = event.error.clone();
            }
        }
        self.finished_at = Some(chrono::Utc::now());
        self
    }
}

/// What the poll endpoint (and the late-registration reply) returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Grant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatusView {
    /// Build the view for a record; `artifact` is only kept for completed jobs.
    pub fn from_record(record: &JobRecord, artifact: Option<Grant>) -> Self {
        let artifact = match record.state {
            JobState::Completed => artifact,
            _ => None,
        };
        Self {
            job_id: record.job_id.clone(),
            status: record.state,
            artifact,
            error: record.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::processing(JobId::new("A"), "raw/A/doc.pdf".into(), None)
    }

    #[test]
    fn new_record_is_processing() {
        let r = record();
        assert_eq!(r.state, JobState::Processing);
        assert!(!r.state.is_terminal());
        assert!(r.finished_at.is_none());
    }

    #[test]
    fn finish_completed_sets_output_key() {
        let event = CompletionEvent::completed(JobId::new("A"), Some("processed/A.txt".into()));
        let r = record().finish(&event);
        assert_eq!(r.state, JobState::Completed);
        assert_eq!(r.output_key.as_deref(), Some("processed/A.txt"));
        assert!(r.finished_at.is_some());
    }

    #[test]
    fn finish_failed_maps_to_error_state() {
        let event = CompletionEvent::failed(JobId::new("A"), "unreadable");
        let r = record().finish(&event);
        assert_eq!(r.state, JobState::Error);
        assert!(r.state.is_terminal());
        assert_eq!(r.error.as_deref(), Some("unreadable"));
    }

    #[test]
    fn status_view_serializes_lowercase() {
        let view = JobStatusView::from_record(&record(), None);
        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(value, serde_json::json!({"job_id": "A", "status": "processing"}));
    }
}
