//! HTTP-level tests for job submission, status polling and result download.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{body_bytes, body_json, get, post_json, post_multipart, TestContext};
use docflow_core::storage::ObjectStore;
use docflow_worker::WorkQueue;
use serde_json::json;

async fn run_next_job(ctx: &TestContext) {
    let job = ctx
        .queue
        .dequeue(Duration::from_secs(1))
        .await
        .unwrap()
        .expect("a job should be queued");
    ctx.worker().handle(job).await;
}

// ---------------------------------------------------------------------------
// Test: multipart submission is accepted and processed end to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_poll_and_download_result() {
    let ctx = TestContext::start();

    let response = post_multipart(
        ctx.app(),
        "/api/v1/jobs",
        Some(("notes.txt", b"  quarterly numbers look fine  ".as_slice())),
        Some("u-42"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job_id = body_json(response).await["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = get(ctx.app(), &format!("/api/v1/status/{job_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "processing");
    assert!(json.get("artifact").is_none());

    // Not downloadable yet.
    let response = get(ctx.app(), &format!("/api/v1/result/{job_id}")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    run_next_job(&ctx).await;

    let response = get(ctx.app(), &format!("/api/v1/status/{job_id}")).await;
    let json = body_json(response).await;
    assert_eq!(json["status"], "completed");
    assert_eq!(json["artifact"]["method"], "GET");
    assert_eq!(
        json["artifact"]["key"],
        format!("processed/{job_id}/notes.txt")
    );

    let response = get(ctx.app(), &format!("/api/v1/result/{job_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("notes.txt"));
    assert_eq!(body_bytes(response).await, b"quarterly numbers look fine");
}

// ---------------------------------------------------------------------------
// Test: a document with no text ends in error and 422 on download
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_job_reports_error() {
    let ctx = TestContext::start();

    let response = post_multipart(
        ctx.app(),
        "/api/v1/jobs",
        Some(("scan.bin", [0u8, 1, 2, 0xff, 0, 3].as_slice())),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job_id = body_json(response).await["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    run_next_job(&ctx).await;

    let json = body_json(get(ctx.app(), &format!("/api/v1/status/{job_id}")).await).await;
    assert_eq!(json["status"], "error");
    assert_eq!(json["error"], "No extractable text found in document");
    assert!(json.get("artifact").is_none());

    let response = get(ctx.app(), &format!("/api/v1/result/{job_id}")).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["code"], "JOB_FAILED");
}

// ---------------------------------------------------------------------------
// Test: invalid multipart submissions are rejected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_without_file_is_rejected() {
    let ctx = TestContext::start();
    let response = post_multipart(ctx.app(), "/api/v1/jobs", None, Some("u-1")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn submit_empty_file_is_rejected() {
    let ctx = TestContext::start();
    let response =
        post_multipart(ctx.app(), "/api/v1/jobs", Some(("a.txt", b"".as_slice())), None).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn submit_with_invalid_upload_id_is_rejected() {
    let ctx = TestContext::start();
    let response = post_multipart(
        ctx.app(),
        "/api/v1/jobs",
        Some(("a.txt", b"hello".as_slice())),
        Some("bad id with spaces"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(ctx
        .queue
        .dequeue(Duration::from_millis(10))
        .await
        .unwrap()
        .is_none());
}

// ---------------------------------------------------------------------------
// Test: submission by object reference
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_by_reference_queues_existing_object() {
    let ctx = TestContext::start();
    ctx.store
        .write("uploads/abc/report.txt", b"annual report")
        .await
        .unwrap();

    let response = post_json(
        ctx.app(),
        "/api/v1/jobs/by-reference",
        json!({"object_key": "uploads/abc/report.txt", "upload_id": "u-7"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job_id = body_json(response).await["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    let job = ctx
        .queue
        .dequeue(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.job_id.as_str(), job_id);
    assert_eq!(job.input_key, "uploads/abc/report.txt");
    assert_eq!(job.upload_id.as_ref().map(|u| u.as_str()), Some("u-7"));
}

#[tokio::test]
async fn submit_by_reference_to_missing_object_is_404() {
    let ctx = TestContext::start();
    let response = post_json(
        ctx.app(),
        "/api/v1/jobs/by-reference",
        json!({"object_key": "uploads/nope/missing.txt"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn submit_by_reference_with_traversal_key_is_400() {
    let ctx = TestContext::start();
    let response = post_json(
        ctx.app(),
        "/api/v1/jobs/by-reference",
        json!({"object_key": "../etc/passwd"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Test: unknown jobs are 404 on both read endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_job_is_404() {
    let ctx = TestContext::start();

    let response = get(ctx.app(), "/api/v1/status/does-not-exist").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");

    let response = get(ctx.app(), "/api/v1/result/does-not-exist").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
