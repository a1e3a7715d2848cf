//! Unit tests for `WsManager`.
//!
//! These tests exercise the connection manager directly, without performing
//! any HTTP upgrades. They verify registration, the connection state machine,
//! send outcomes, binding purges on teardown and graceful shutdown.

use std::sync::Arc;

use assert_matches::assert_matches;
use axum::extract::ws::Message;
use docflow_api::correlation::{BindOutcome, CorrelationRegistry};
use docflow_api::ws::{ConnectionError, ConnectionState, SendOutcome, WsManager};
use docflow_core::types::{ClientId, JobId};

fn manager() -> WsManager {
    WsManager::new(Arc::new(CorrelationRegistry::new()))
}

fn client(id: &str) -> ClientId {
    ClientId::new(id)
}

// ---------------------------------------------------------------------------
// Test: new manager starts with zero connections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_manager_has_zero_connections() {
    let manager = manager();

    assert_eq!(manager.connection_count().await, 0);
    assert_eq!(manager.state(&client("c1")).await, ConnectionState::Closed);
}

// ---------------------------------------------------------------------------
// Test: register() starts Connecting, open() moves to Open
// ---------------------------------------------------------------------------

#[tokio::test]
async fn register_then_open_walks_state_machine() {
    let manager = manager();

    let reg = manager.register(client("c1")).await.unwrap();
    assert_eq!(manager.connection_count().await, 1);
    assert_eq!(manager.state(&client("c1")).await, ConnectionState::Connecting);

    assert!(manager.open(&client("c1"), reg.conn_id).await);
    assert_eq!(manager.state(&client("c1")).await, ConnectionState::Open);

    // Opening twice is an invalid transition.
    assert!(!manager.open(&client("c1"), reg.conn_id).await);
}

// ---------------------------------------------------------------------------
// Test: a second registration for the same client id is rejected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let manager = manager();
    let reg = manager.register(client("c1")).await.unwrap();
    manager.open(&client("c1"), reg.conn_id).await;

    let err = manager.register(client("c1")).await.err().unwrap();
    assert_matches!(err, ConnectionError::DuplicateClient(id) if id == client("c1"));

    // The existing connection is untouched.
    assert_eq!(manager.connection_count().await, 1);
    assert_eq!(manager.state(&client("c1")).await, ConnectionState::Open);
}

// ---------------------------------------------------------------------------
// Test: send() outcomes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_to_open_connection_is_delivered() {
    let manager = manager();
    let mut reg = manager.register(client("c1")).await.unwrap();
    manager.open(&client("c1"), reg.conn_id).await;

    let outcome = manager.send(&client("c1"), "hello".to_string()).await;
    assert_eq!(outcome, SendOutcome::Delivered);

    let msg = reg.receiver.recv().await.unwrap();
    assert_matches!(msg, Message::Text(t) if t.as_str() == "hello");
}

#[tokio::test]
async fn send_to_unknown_client_is_not_connected() {
    let manager = manager();
    assert_eq!(
        manager.send(&client("ghost"), "x".to_string()).await,
        SendOutcome::NotConnected
    );
}

#[tokio::test]
async fn send_before_open_is_not_connected() {
    let manager = manager();
    let _reg = manager.register(client("c1")).await.unwrap();

    assert_eq!(
        manager.send(&client("c1"), "x".to_string()).await,
        SendOutcome::NotConnected
    );
}

#[tokio::test]
async fn send_failure_tears_connection_down() {
    let manager = manager();
    let reg = manager.register(client("c1")).await.unwrap();
    manager.open(&client("c1"), reg.conn_id).await;
    manager
        .register_interest(&client("c1"), reg.conn_id, JobId::new("A"), None)
        .await;

    // The sender task is gone.
    drop(reg.receiver);

    let outcome = manager.send(&client("c1"), "x".to_string()).await;
    assert_eq!(outcome, SendOutcome::SendFailed);
    assert_eq!(manager.connection_count().await, 0);
    assert!(reg.closed.is_cancelled());
    assert!(manager.registry().is_empty(), "bindings must be purged");

    assert_eq!(
        manager.send(&client("c1"), "x".to_string()).await,
        SendOutcome::NotConnected
    );
}

// ---------------------------------------------------------------------------
// Test: register_interest() binds only while the connection is open
// ---------------------------------------------------------------------------

#[tokio::test]
async fn register_interest_requires_open_connection() {
    let manager = manager();
    let reg = manager.register(client("c1")).await.unwrap();

    let before_open = manager
        .register_interest(&client("c1"), reg.conn_id, JobId::new("A"), None)
        .await;
    assert!(before_open.is_none());

    manager.open(&client("c1"), reg.conn_id).await;
    let after_open = manager
        .register_interest(&client("c1"), reg.conn_id, JobId::new("A"), None)
        .await;
    assert_eq!(after_open, Some(BindOutcome::Bound));
    assert_eq!(manager.registry().len(), 1);
}

// ---------------------------------------------------------------------------
// Test: register_interest() queues the ack before anything else for the job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn register_interest_queues_ack_with_binding() {
    let manager = manager();
    let mut reg = manager.register(client("c1")).await.unwrap();
    manager.open(&client("c1"), reg.conn_id).await;

    manager
        .register_interest(&client("c1"), reg.conn_id, JobId::new("A"), None)
        .await;
    let binding = manager.registry().binding(&JobId::new("A")).unwrap();
    assert_eq!(binding.conn_id, Some(reg.conn_id));
    manager.send(&client("c1"), "notification".to_string()).await;

    assert_matches!(
        reg.receiver.try_recv(),
        Ok(Message::Text(t)) if t.as_str() == r#"{"type":"registered","job_id":"A"}"#
    );
    assert_matches!(reg.receiver.try_recv(), Ok(Message::Text(t)) if t.as_str() == "notification");
}

#[tokio::test]
async fn late_registration_queues_no_ack() {
    let manager = manager();
    let mut reg = manager.register(client("c1")).await.unwrap();
    manager.open(&client("c1"), reg.conn_id).await;
    manager.registry().resolve_and_unbind(&JobId::new("A"));

    let outcome = manager
        .register_interest(&client("c1"), reg.conn_id, JobId::new("A"), None)
        .await;
    assert_eq!(outcome, Some(BindOutcome::AlreadyResolved));
    assert!(reg.receiver.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Test: send_to() refuses a frame addressed to a previous connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_to_stale_connection_is_not_connected() {
    let manager = manager();
    let first = manager.register(client("c1")).await.unwrap();
    manager.open(&client("c1"), first.conn_id).await;
    manager.release(&client("c1"), first.conn_id).await;

    let mut second = manager.register(client("c1")).await.unwrap();
    manager.open(&client("c1"), second.conn_id).await;

    let outcome = manager
        .send_to(&client("c1"), Some(first.conn_id), "x".to_string())
        .await;
    assert_eq!(outcome, SendOutcome::NotConnected);
    assert!(second.receiver.try_recv().is_err());
    assert_eq!(manager.state(&client("c1")).await, ConnectionState::Open);

    let outcome = manager
        .send_to(&client("c1"), Some(second.conn_id), "x".to_string())
        .await;
    assert_eq!(outcome, SendOutcome::Delivered);
}

// ---------------------------------------------------------------------------
// Test: unregister() purges the client's bindings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unregister_purges_bindings() {
    let manager = manager();
    let reg = manager.register(client("c1")).await.unwrap();
    manager.open(&client("c1"), reg.conn_id).await;
    for id in ["A", "B"] {
        manager
            .register_interest(&client("c1"), reg.conn_id, JobId::new(id), None)
            .await;
    }
    assert_eq!(manager.registry().len(), 2);

    assert!(manager.unregister(&client("c1")).await);
    assert!(manager.registry().is_empty());
    assert_eq!(manager.state(&client("c1")).await, ConnectionState::Closed);

    // Second unregister is a no-op.
    assert!(!manager.unregister(&client("c1")).await);
}

// ---------------------------------------------------------------------------
// Test: a stale release cannot tear down a newer connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_release_leaves_new_connection_alone() {
    let manager = manager();
    let first = manager.register(client("c1")).await.unwrap();
    manager.open(&client("c1"), first.conn_id).await;
    assert!(manager.release(&client("c1"), first.conn_id).await);

    let second = manager.register(client("c1")).await.unwrap();
    manager.open(&client("c1"), second.conn_id).await;
    manager
        .register_interest(&client("c1"), second.conn_id, JobId::new("A"), None)
        .await;

    // The first connection's handler finishing late.
    assert!(!manager.release(&client("c1"), first.conn_id).await);

    assert_eq!(manager.state(&client("c1")).await, ConnectionState::Open);
    assert_eq!(manager.registry().len(), 1);
}

// ---------------------------------------------------------------------------
// Test: shutdown_all() sends Close and clears all connections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_all_sends_close_and_clears() {
    let manager = manager();

    let mut reg1 = manager.register(client("c1")).await.unwrap();
    let mut reg2 = manager.register(client("c2")).await.unwrap();
    manager.open(&client("c1"), reg1.conn_id).await;
    manager.open(&client("c2"), reg2.conn_id).await;
    assert_eq!(manager.connection_count().await, 2);

    manager.shutdown_all().await;

    assert_eq!(manager.connection_count().await, 0);
    assert_matches!(reg1.receiver.recv().await, Some(Message::Close(None)));
    assert_matches!(reg2.receiver.recv().await, Some(Message::Close(None)));
    assert!(reg1.closed.is_cancelled());
    assert!(reg2.closed.is_cancelled());
}

// ---------------------------------------------------------------------------
// Test: ping_all() reaches open connections only
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_all_skips_connecting_clients() {
    let manager = manager();
    let mut open = manager.register(client("c1")).await.unwrap();
    manager.open(&client("c1"), open.conn_id).await;
    let mut pending = manager.register(client("c2")).await.unwrap();

    manager.ping_all().await;

    assert_matches!(open.receiver.try_recv(), Ok(Message::Ping(_)));
    assert!(pending.receiver.try_recv().is_err());
}
