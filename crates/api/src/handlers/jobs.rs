//! Handlers for job submission, status polling and result download.
//!
//! Submission only stores the input, writes a `processing` status record and
//! enqueues the job; workers do everything else.

use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use docflow_core::error::CoreError;
use docflow_core::job_events::CompletionEvent;
use docflow_core::job_status::{JobRecord, JobState, JobStatusView};
use docflow_core::storage::{output_key_for, sanitize_filename, validate_key, RAW_PREFIX};
use docflow_core::types::{JobId, UploadId};
use docflow_worker::JobRequest;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Response body for an accepted job.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobAccepted {
    pub job_id: JobId,
}

/// Request body for submitting an already-uploaded object.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitByReference {
    #[validate(length(min = 1, max = 512))]
    pub object_key: String,
    #[validate(length(min = 1, max = 128))]
    pub upload_id: Option<String>,
}

/// POST /api/v1/jobs
///
/// Multipart form with a required `file` field and an optional `upload_id`.
pub async fn submit_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<JobAccepted>)> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut upload_id: Option<UploadId> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read file: {e}")))?;
                file = Some((filename, bytes.to_vec()));
            }
            Some("upload_id") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read upload_id: {e}")))?;
                if !raw.trim().is_empty() {
                    upload_id = Some(UploadId::parse(raw.trim())?);
                }
            }
            _ => {}
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| CoreError::Validation("Missing required 'file' field".into()))?;
    let filename = validate_filename(&filename)?;
    if bytes.is_empty() {
        return Err(CoreError::Validation("Uploaded file is empty".into()).into());
    }
    if bytes.len() > state.config.max_upload_bytes {
        return Err(CoreError::Validation(format!(
            "Uploaded file exceeds {} bytes",
            state.config.max_upload_bytes
        ))
        .into());
    }

    let job_id = JobId::generate();
    let input_key = format!("{RAW_PREFIX}/{job_id}/{filename}");
    state.store.write(&input_key, &bytes).await?;

    enqueue_job(&state, job_id.clone(), input_key, upload_id).await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id })))
}

/// POST /api/v1/jobs/by-reference
pub async fn submit_by_reference(
    State(state): State<AppState>,
    Json(body): Json<SubmitByReference>,
) -> AppResult<(StatusCode, Json<JobAccepted>)> {
    body.validate()
        .map_err(|e| CoreError::Validation(e.to_string()))?;
    validate_key(&body.object_key)?;
    let upload_id = body.upload_id.map(UploadId::parse).transpose()?;

    if !state.store.exists(&body.object_key).await? {
        return Err(CoreError::NotFound {
            entity: "Object",
            id: body.object_key,
        }
        .into());
    }

    let job_id = JobId::generate();
    enqueue_job(&state, job_id.clone(), body.object_key, upload_id).await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id })))
}

/// GET /api/v1/status/{job_id}
pub async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<JobStatusView>> {
    let record = find_record(&state, JobId::new(job_id)).await?;
    Ok(Json(status_view(&state, &record)))
}

/// GET /api/v1/result/{job_id} -- the produced text as an attachment.
pub async fn get_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Response> {
    let record = find_record(&state, JobId::new(job_id)).await?;

    match record.state {
        JobState::Processing => Err(CoreError::Conflict(format!(
            "Job {} is still processing",
            record.job_id
        ))
        .into()),
        JobState::Error => Err(AppError::JobFailed(
            record
                .error
                .unwrap_or_else(|| "Job failed without an error message".into()),
        )),
        JobState::Completed => {
            let key = record.output_key.ok_or_else(|| {
                AppError::InternalError(format!("Completed job {} has no output", record.job_id))
            })?;
            let bytes = state.store.read(&key).await?;
            let filename = key.rsplit('/').next().unwrap_or("result.txt");

            Ok((
                [
                    (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{filename}\""),
                    ),
                ],
                bytes,
            )
                .into_response())
        }
    }
}

/// Build the poll view for `record`, with a fresh download grant when completed.
pub(crate) fn status_view(state: &AppState, record: &JobRecord) -> JobStatusView {
    let artifact = match (&record.state, &record.output_key) {
        (JobState::Completed, Some(key)) => match state.store.get_grant(key) {
            Ok(grant) => Some(grant),
            Err(e) => {
                tracing::warn!(job_id = %record.job_id, error = %e, "Failed to issue artifact grant");
                None
            }
        },
        _ => None,
    };
    JobStatusView::from_record(record, artifact)
}

async fn find_record(state: &AppState, job_id: JobId) -> AppResult<JobRecord> {
    state
        .statuses
        .get(&job_id)
        .await?
        .ok_or_else(|| {
            CoreError::NotFound {
                entity: "Job",
                id: job_id.to_string(),
            }
            .into()
        })
}

/// Write the `processing` record, then enqueue.
///
/// If the enqueue fails the record is moved to `error` so that pollers do
/// not wait forever.
async fn enqueue_job(
    state: &AppState,
    job_id: JobId,
    input_key: String,
    upload_id: Option<UploadId>,
) -> AppResult<()> {
    let record = JobRecord::processing(job_id.clone(), input_key.clone(), upload_id.clone());
    state.statuses.put(&record).await?;

    let request = JobRequest {
        job_id: job_id.clone(),
        output_key: output_key_for(job_id.as_str(), &input_key),
        input_key,
        upload_id,
        submitted_at: record.submitted_at,
    };

    if let Err(e) = state.queue.enqueue(request).await {
        let failed = record.finish(&CompletionEvent::failed(
            job_id.clone(),
            "Job could not be queued",
        ));
        if let Err(put_err) = state.statuses.put(&failed).await {
            tracing::error!(%job_id, error = %put_err, "Failed to record enqueue failure");
        }
        return Err(e.into());
    }

    tracing::info!(%job_id, "Job submitted");
    Ok(())
}

fn validate_filename(raw: &str) -> Result<String, CoreError> {
    if raw.trim().is_empty() {
        return Err(CoreError::Validation("Filename must not be empty".into()));
    }
    if raw.contains('/') || raw.contains('\\') {
        return Err(CoreError::Validation(
            "Filename must not contain path separators".into(),
        ));
    }
    Ok(sanitize_filename(raw))
}
