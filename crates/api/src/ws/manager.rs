use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message};
use docflow_core::job_events::ServerFrame;
use docflow_core::types::{ClientId, JobId, Timestamp, UploadId};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::correlation::{BindOutcome, Binding, CorrelationRegistry};

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Distinguishes successive connections that reuse the same client id.
pub type ConnectionId = u64;

/// Lifecycle of one live connection.
///
/// `Connecting → Open → Closing → Closed`. `Closed` is terminal and never
/// stored: a client id without an entry is reported as `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Open) | (Connecting, Closing) | (Open, Closing) | (Closing, Closed)
        )
    }
}

/// Outcome of [`WsManager::send`]. Never an error for the caller to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    NotConnected,
    /// The outbound channel was gone; the connection has been torn down.
    SendFailed,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Client {0} already has an open connection")]
    DuplicateClient(ClientId),

    #[error("Invalid client id: {0}")]
    InvalidClientId(String),
}

/// Returned by [`WsManager::register`] to the connection's owning task.
pub struct Registration {
    pub conn_id: ConnectionId,
    /// Outbound messages to forward to the socket sink.
    pub receiver: mpsc::UnboundedReceiver<Message>,
    /// Cancelled when the manager tears the connection down.
    pub closed: CancellationToken,
}

/// Metadata for a single WebSocket connection.
struct WsConnection {
    conn_id: ConnectionId,
    state: ConnectionState,
    sender: WsSender,
    closed: CancellationToken,
    connected_at: Timestamp,
}

/// Manages all live connections, keyed by client id.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application. Teardown purges the connection's bindings
/// from the [`CorrelationRegistry`] while holding the write lock, so no
/// interest registration can slip in between.
pub struct WsManager {
    connections: RwLock<HashMap<ClientId, WsConnection>>,
    registry: Arc<CorrelationRegistry>,
    next_conn_id: AtomicU64,
}

impl WsManager {
    pub fn new(registry: Arc<CorrelationRegistry>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            registry,
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    /// Register a new connection in the `Connecting` state.
    ///
    /// Fails with [`ConnectionError::DuplicateClient`] if `client_id` already
    /// has a connection; the existing one is left untouched.
    pub async fn register(&self, client_id: ClientId) -> Result<Registration, ConnectionError> {
        let mut conns = self.connections.write().await;
        if conns.contains_key(&client_id) {
            tracing::warn!(%client_id, "Rejected duplicate connection");
            return Err(ConnectionError::DuplicateClient(client_id));
        }

        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        conns.insert(
            client_id.clone(),
            WsConnection {
                conn_id,
                state: ConnectionState::Connecting,
                sender: tx,
                closed: closed.clone(),
                connected_at: chrono::Utc::now(),
            },
        );
        tracing::info!(%client_id, conn_id, "Connection registered");

        Ok(Registration {
            conn_id,
            receiver: rx,
            closed,
        })
    }

    /// Move a registered connection to `Open`. Returns `false` if it is gone.
    pub async fn open(&self, client_id: &ClientId, conn_id: ConnectionId) -> bool {
        let mut conns = self.connections.write().await;
        match conns.get_mut(client_id) {
            Some(conn) if conn.conn_id == conn_id => {
                transition(client_id, conn, ConnectionState::Open)
            }
            _ => false,
        }
    }

    pub async fn state(&self, client_id: &ClientId) -> ConnectionState {
        self.connections
            .read()
            .await
            .get(client_id)
            .map(|c| c.state)
            .unwrap_or(ConnectionState::Closed)
    }

    /// Bind `job_id` to this connection if it is still open.
    ///
    /// When the job is bound, the `registered` acknowledgement is queued on
    /// the connection before any notification for the job can be.
    /// Returns `None` when the connection has already been torn down.
    pub async fn register_interest(
        &self,
        client_id: &ClientId,
        conn_id: ConnectionId,
        job_id: JobId,
        upload_id: Option<UploadId>,
    ) -> Option<BindOutcome> {
        let ack = match (ServerFrame::Registered {
            job_id: job_id.clone(),
        })
        .to_json()
        {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::error!(%client_id, %job_id, error = %e, "Failed to serialize registration ack");
                None
            }
        };

        let conns = self.connections.read().await;
        match conns.get(client_id) {
            Some(conn) if conn.conn_id == conn_id && conn.state == ConnectionState::Open => {
                let binding = Binding {
                    client_id: client_id.clone(),
                    conn_id: Some(conn_id),
                    upload_id,
                };
                let outcome = self.registry.bind_with(job_id, binding, || {
                    if let Some(payload) = ack {
                        let _ = conn.sender.send(Message::Text(payload.into()));
                    }
                });
                Some(outcome)
            }
            _ => None,
        }
    }

    /// Push a text payload to whatever connection `client_id` has.
    pub async fn send(&self, client_id: &ClientId, payload: String) -> SendOutcome {
        self.deliver(client_id, None, Message::Text(payload.into()))
            .await
    }

    /// Push a text payload only if `client_id` is still on connection
    /// `conn_id`. `None` behaves like [`send`](Self::send).
    pub async fn send_to(
        &self,
        client_id: &ClientId,
        conn_id: Option<ConnectionId>,
        payload: String,
    ) -> SendOutcome {
        self.deliver(client_id, conn_id, Message::Text(payload.into()))
            .await
    }

    /// Push a raw frame. A closed channel tears the connection down.
    async fn deliver(
        &self,
        client_id: &ClientId,
        expected: Option<ConnectionId>,
        message: Message,
    ) -> SendOutcome {
        let failed_conn = {
            let conns = self.connections.read().await;
            let Some(conn) = conns.get(client_id) else {
                return SendOutcome::NotConnected;
            };
            if conn.state != ConnectionState::Open {
                return SendOutcome::NotConnected;
            }
            if expected.is_some_and(|id| id != conn.conn_id) {
                tracing::debug!(%client_id, conn_id = conn.conn_id, "Frame addressed to a previous connection");
                return SendOutcome::NotConnected;
            }
            match conn.sender.send(message) {
                Ok(()) => return SendOutcome::Delivered,
                Err(_) => conn.conn_id,
            }
        };

        tracing::warn!(%client_id, conn_id = failed_conn, "Send failed, tearing down connection");
        self.release(client_id, failed_conn).await;
        SendOutcome::SendFailed
    }

    /// Send a Close frame and tear the connection down.
    pub async fn close(&self, client_id: &ClientId, conn_id: ConnectionId, frame: CloseFrame) {
        let conns = self.connections.read().await;
        if let Some(conn) = conns.get(client_id).filter(|c| c.conn_id == conn_id) {
            let _ = conn.sender.send(Message::Close(Some(frame)));
        }
        drop(conns);
        self.release(client_id, conn_id).await;
    }

    /// Tear down whatever connection `client_id` currently has.
    ///
    /// Purges every binding the client owns. Returns `false` if there was no
    /// connection.
    pub async fn unregister(&self, client_id: &ClientId) -> bool {
        let mut conns = self.connections.write().await;
        let Some(conn) = conns.remove(client_id) else {
            return false;
        };
        self.teardown(client_id, conn);
        true
    }

    /// Tear down the connection only if it is still `conn_id`.
    ///
    /// A stale teardown from a previous connection with the same client id
    /// leaves the current one alone. Safe to call more than once.
    pub async fn release(&self, client_id: &ClientId, conn_id: ConnectionId) -> bool {
        let mut conns = self.connections.write().await;
        match conns.get(client_id) {
            Some(conn) if conn.conn_id == conn_id => {}
            _ => return false,
        }
        let Some(conn) = conns.remove(client_id) else {
            return false;
        };
        self.teardown(client_id, conn);
        true
    }

    /// Caller holds the connections write lock.
    fn teardown(&self, client_id: &ClientId, mut conn: WsConnection) {
        transition(client_id, &mut conn, ConnectionState::Closing);
        let purged = self.registry.unbind_by_client(client_id);
        conn.closed.cancel();
        transition(client_id, &mut conn, ConnectionState::Closed);

        let open_secs = (chrono::Utc::now() - conn.connected_at).num_seconds();
        tracing::info!(%client_id, conn_id = conn.conn_id, purged, open_secs, "Connection closed");
    }

    /// Return the current number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Close frame to every connection, then tear them all down.
    ///
    /// Used during graceful shutdown.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for (client_id, conn) in conns.drain().collect::<Vec<_>>() {
            let _ = conn.sender.send(Message::Close(None));
            self.teardown(&client_id, conn);
        }
        tracing::info!(count, "Closed all WebSocket connections");
    }

    /// Send a Ping frame to every open connection.
    pub async fn ping_all(&self) {
        let conns = self.connections.read().await;
        for conn in conns.values().filter(|c| c.state == ConnectionState::Open) {
            let _ = conn.sender.send(Message::Ping(Bytes::new()));
        }
    }
}

fn transition(client_id: &ClientId, conn: &mut WsConnection, next: ConnectionState) -> bool {
    if !conn.state.can_transition_to(next) {
        tracing::warn!(%client_id, from = ?conn.state, to = ?next, "Ignored invalid connection transition");
        return false;
    }
    conn.state = next;
    true
}
