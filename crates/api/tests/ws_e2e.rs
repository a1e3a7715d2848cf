//! End-to-end tests of the live channel over a real socket.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use assert_matches::assert_matches;
use common::TestContext;
use docflow_core::job_events::CompletionEvent;
use docflow_core::job_status::JobRecord;
use docflow_core::types::JobId;
use docflow_worker::JobStatusStore;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(2);

async fn connect(addr: SocketAddr, client_id: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/api/v1/ws/{client_id}"))
        .await
        .expect("websocket handshake");
    ws
}

/// Next frame that is not a ping, within [`WAIT`].
async fn next_frame(ws: &mut Client) -> Message {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("frame ok");
        if !matches!(msg, Message::Ping(_) | Message::Pong(_)) {
            return msg;
        }
    }
}

async fn next_json(ws: &mut Client) -> serde_json::Value {
    match next_frame(ws).await {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

async fn register(ws: &mut Client, job_id: &str, upload_id: Option<&str>) {
    let mut body = json!({ "job_id": job_id });
    if let Some(upload_id) = upload_id {
        body["upload_id"] = json!(upload_id);
    }
    ws.send(Message::Text(body.to_string())).await.unwrap();
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition should become true");
}

// ---------------------------------------------------------------------------
// Test: interest registration, then exactly one notification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn notification_is_delivered_once() {
    let ctx = TestContext::start();
    let addr = ctx.serve().await;
    let mut ws = connect(addr, "c1").await;

    register(&mut ws, "A", Some("u-1")).await;
    let ack = next_json(&mut ws).await;
    assert_eq!(ack, json!({"type": "registered", "job_id": "A"}));

    let event = CompletionEvent::completed(JobId::new("A"), Some("processed/A/doc.txt".into()));
    ctx.bus.publish_raw(event.to_json().unwrap());
    ctx.bus.publish_raw(event.to_json().unwrap());

    let frame = next_json(&mut ws).await;
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["job_id"], "A");
    assert_eq!(frame["status"], "completed");
    assert_eq!(frame["upload_id"], "u-1");
    assert_eq!(frame["result"], "processed/A/doc.txt");

    // The duplicate event must not produce a second push.
    let extra = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(extra.is_err(), "no further frames expected");
    assert!(ctx.state.registry.is_empty());
}

// ---------------------------------------------------------------------------
// Test: a second connection under the same client id is refused
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_client_is_refused() {
    let ctx = TestContext::start();
    let addr = ctx.serve().await;
    let _first = connect(addr, "c1").await;

    let manager = ctx.state.ws_manager.clone();
    tokio::time::timeout(WAIT, async {
        while manager.connection_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let mut second = connect(addr, "c1").await;
    let frame = next_json(&mut second).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["code"], "DUPLICATE_CLIENT");

    let close = next_frame(&mut second).await;
    assert_matches!(close, Message::Close(Some(cf)) if cf.code == CloseCode::Policy);
    assert_eq!(manager.connection_count().await, 1);
}

// ---------------------------------------------------------------------------
// Test: malformed inbound frames end the connection with a protocol error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_frame_is_protocol_error() {
    let ctx = TestContext::start();
    let addr = ctx.serve().await;
    let mut ws = connect(addr, "c1").await;

    ws.send(Message::Text("{not json".to_string())).await.unwrap();

    let frame = next_json(&mut ws).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["code"], "PROTOCOL_ERROR");

    let close = next_frame(&mut ws).await;
    assert_matches!(close, Message::Close(Some(cf)) if cf.code == CloseCode::Protocol);

    let registry = ctx.state.registry.clone();
    let manager = ctx.state.ws_manager.clone();
    tokio::time::timeout(WAIT, async {
        while manager.connection_count().await != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(registry.is_empty());
}

// ---------------------------------------------------------------------------
// Test: registering for an already-resolved job answers with its status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn late_registration_gets_status() {
    let ctx = TestContext::start();
    let addr = ctx.serve().await;

    let job_id = JobId::new("A");
    let event = CompletionEvent::completed(job_id.clone(), Some("processed/A/doc.txt".into()));
    let record = JobRecord::processing(job_id.clone(), "raw/A/doc.txt".into(), None).finish(&event);
    ctx.statuses.put(&record).await.unwrap();

    // Nobody is listening yet: the event is consumed as an orphan.
    ctx.bus.publish_raw(event.to_json().unwrap());
    let registry = ctx.state.registry.clone();
    wait_for(|| registry.is_resolved(&job_id)).await;

    let mut ws = connect(addr, "late").await;
    register(&mut ws, "A", None).await;

    let frame = next_json(&mut ws).await;
    assert_eq!(frame["type"], "status");
    assert_eq!(frame["job_id"], "A");
    assert_eq!(frame["status"], "completed");
    assert_eq!(frame["artifact"]["key"], "processed/A/doc.txt");
    assert!(registry.binding(&job_id).is_none());
}

// ---------------------------------------------------------------------------
// Test: disconnecting purges the client's bindings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_purges_bindings() {
    let ctx = TestContext::start();
    let addr = ctx.serve().await;
    let mut ws = connect(addr, "c1").await;

    register(&mut ws, "A", None).await;
    next_json(&mut ws).await;
    assert_eq!(ctx.state.registry.len(), 1);

    ws.close(None).await.unwrap();
    drop(ws);

    let registry = ctx.state.registry.clone();
    wait_for(|| registry.is_empty()).await;
}

// ---------------------------------------------------------------------------
// Test: an invalid client id is refused before the upgrade
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_client_id_is_400() {
    let ctx = TestContext::start();
    let addr = ctx.serve().await;

    let err = connect_async(format!("ws://{addr}/api/v1/ws/bad!id"))
        .await
        .err()
        .expect("handshake should fail");
    assert_matches!(err, WsError::Http(response) if response.status() == 400);
}
