use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use docflow_core::job_events::{InterestRequest, ServerFrame, ERR_DUPLICATE_CLIENT, ERR_PROTOCOL};
use docflow_core::types::{ClientId, JobId};
use futures::{SinkExt, StreamExt};

use crate::correlation::BindOutcome;
use crate::error::AppResult;
use crate::handlers::jobs::status_view;
use crate::state::AppState;
use crate::ws::manager::{ConnectionError, ConnectionId};

/// How long the sender task may take to flush queued frames after teardown.
const SEND_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// GET /api/v1/ws/{client_id} -- upgrade to the live notification channel.
///
/// An invalid client id is refused before the upgrade with 400.
pub async fn ws_handler(
    Path(client_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> AppResult<impl IntoResponse> {
    let client_id =
        ClientId::parse(client_id).map_err(|e| ConnectionError::InvalidClientId(e.to_string()))?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, client_id, state)))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Registers the client, spawns a sender task that forwards the manager
/// channel to the sink, and processes inbound interest registrations on the
/// current task until the client leaves, a protocol error occurs or the
/// manager tears the connection down.
async fn handle_socket(mut socket: WebSocket, client_id: ClientId, state: AppState) {
    let ws_manager = state.ws_manager.clone();

    let registration = match ws_manager.register(client_id.clone()).await {
        Ok(registration) => registration,
        Err(e) => {
            reject(&mut socket, &e).await;
            return;
        }
    };
    let conn_id = registration.conn_id;
    let closed = registration.closed;
    let mut rx = registration.receiver;

    let (mut sink, mut stream) = socket.split();

    let sender_client_id = client_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                tracing::debug!(client_id = %sender_client_id, "WebSocket sink closed");
                break;
            }
            if is_close {
                break;
            }
        }
    });

    ws_manager.open(&client_id, conn_id).await;

    loop {
        let next = tokio::select! {
            _ = closed.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                if !handle_interest(&state, &client_id, conn_id, text.as_str()).await {
                    break;
                }
            }
            Some(Ok(Message::Binary(_))) => {
                protocol_error(&state, &client_id, conn_id, "binary frames are not supported")
                    .await;
                break;
            }
            Some(Ok(Message::Pong(_))) => {
                tracing::trace!(%client_id, "Pong received");
            }
            Some(Ok(Message::Ping(_))) => {}
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                tracing::debug!(%client_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    ws_manager.release(&client_id, conn_id).await;
    if tokio::time::timeout(SEND_DRAIN_TIMEOUT, send_task).await.is_err() {
        tracing::debug!(%client_id, "Sender task did not drain in time");
    }
}

/// Handle one inbound text frame. Returns `false` if the connection must end.
async fn handle_interest(
    state: &AppState,
    client_id: &ClientId,
    conn_id: ConnectionId,
    raw: &str,
) -> bool {
    let request = match InterestRequest::parse(raw) {
        Ok(request) => request,
        Err(e) => {
            protocol_error(state, client_id, conn_id, &e.to_string()).await;
            return false;
        }
    };

    let job_id = request.job_id.clone();
    let outcome = state
        .ws_manager
        .register_interest(client_id, conn_id, request.job_id, request.upload_id)
        .await;

    match outcome {
        None => false,
        // The manager queued the ack together with the binding.
        Some(BindOutcome::Bound) | Some(BindOutcome::Rebound { .. }) => true,
        Some(BindOutcome::AlreadyResolved) => {
            let frame = resolved_status_frame(state, &job_id).await;
            push(state, client_id, &frame).await;
            true
        }
    }
}

/// The poll answer for a job whose completion was already consumed.
async fn resolved_status_frame(state: &AppState, job_id: &JobId) -> ServerFrame {
    match state.statuses.get(job_id).await {
        Ok(Some(record)) => {
            tracing::debug!(%job_id, "Late registration answered from status store");
            ServerFrame::Status(status_view(state, &record))
        }
        Ok(None) => ServerFrame::error("NOT_FOUND", format!("Job {job_id} has no status record")),
        Err(e) => {
            tracing::warn!(%job_id, error = %e, "Status lookup failed for late registration");
            ServerFrame::error("SERVICE_UNAVAILABLE", "Job status is temporarily unavailable")
        }
    }
}

async fn protocol_error(state: &AppState, client_id: &ClientId, conn_id: ConnectionId, reason: &str) {
    tracing::warn!(%client_id, reason, "Live-channel protocol error");
    push(state, client_id, &ServerFrame::error(ERR_PROTOCOL, reason)).await;
    state
        .ws_manager
        .close(
            client_id,
            conn_id,
            CloseFrame {
                code: close_code::PROTOCOL,
                reason: "protocol error".into(),
            },
        )
        .await;
}

async fn push(state: &AppState, client_id: &ClientId, frame: &ServerFrame) {
    match frame.to_json() {
        Ok(payload) => {
            state.ws_manager.send(client_id, payload).await;
        }
        Err(e) => tracing::error!(%client_id, error = %e, "Failed to serialize server frame"),
    }
}

/// Refuse a connection on the raw socket; it was never registered.
async fn reject(socket: &mut WebSocket, err: &ConnectionError) {
    let frame = ServerFrame::error(ERR_DUPLICATE_CLIENT, err.to_string());
    if let Ok(payload) = frame.to_json() {
        let _ = socket.send(Message::Text(payload.into())).await;
    }
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: "duplicate client id".into(),
        })))
        .await;
}
