//! Completion-event listener and dispatcher.
//!
//! [`CompletionListener`] subscribes to the completion channel, resolves each
//! event against the [`CorrelationRegistry`] and pushes a notification to the
//! bound client. It runs as exactly one supervised task per process, owned by
//! a [`ListenerHandle`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docflow_core::job_events::{CompletionEvent, Notification, ServerFrame};
use docflow_events::{BusError, EventSubscriber};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::correlation::{CorrelationRegistry, Resolution};
use crate::ws::{SendOutcome, WsManager};

/// Default bounded receive timeout.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("Listener task aborted: {0}")]
    Aborted(String),

    #[error("Listener did not stop within {0:?}")]
    ShutdownTimedOut(Duration),
}

/// What happened to one payload read from the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// A binding existed but the client was no longer connected.
    NotConnected,
    /// A binding existed but the send failed; the connection was torn down.
    SendFailed,
    /// No client had registered interest.
    Orphan,
    /// The job was already resolved.
    Duplicate,
    /// The payload did not match the completion event schema.
    Malformed,
}

impl From<SendOutcome> for DispatchOutcome {
    fn from(outcome: SendOutcome) -> Self {
        match outcome {
            SendOutcome::Delivered => DispatchOutcome::Delivered,
            SendOutcome::NotConnected => DispatchOutcome::NotConnected,
            SendOutcome::SendFailed => DispatchOutcome::SendFailed,
        }
    }
}

/// Shared running flag read by the health endpoint.
#[derive(Debug, Clone, Default)]
pub struct ListenerStatus {
    running: Arc<AtomicBool>,
}

impl ListenerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

pub struct CompletionListener {
    ws_manager: Arc<WsManager>,
    registry: Arc<CorrelationRegistry>,
    recv_timeout: Duration,
}

impl CompletionListener {
    pub fn new(ws_manager: Arc<WsManager>, recv_timeout: Duration) -> Self {
        let registry = Arc::clone(ws_manager.registry());
        Self {
            ws_manager,
            registry,
            recv_timeout,
        }
    }

    /// Consume the subscription until cancelled or the bus fails permanently.
    ///
    /// Malformed payloads and transient bus errors never end the loop. The
    /// subscription is closed on every exit path.
    pub async fn run(
        &self,
        subscriber: &mut dyn EventSubscriber,
        cancel: CancellationToken,
    ) -> Result<(), ListenerError> {
        tracing::info!(
            recv_timeout_ms = self.recv_timeout.as_millis() as u64,
            "Completion listener started",
        );

        let result = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }

            let next = tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                next = subscriber.recv(self.recv_timeout) => next,
            };

            match next {
                Ok(Some(payload)) => {
                    self.dispatch(&payload).await;
                }
                Ok(None) => {}
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "Event bus failed permanently, listener stopping");
                    break Err(ListenerError::Bus(e));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Transient event bus error");
                }
            }
        };

        if let Err(e) = subscriber.close().await {
            tracing::warn!(error = %e, "Failed to close event subscription");
        }
        tracing::info!("Completion listener stopped");
        result
    }

    /// Handle one raw payload from the bus.
    pub async fn dispatch(&self, payload: &str) -> DispatchOutcome {
        let event = match CompletionEvent::parse(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed completion event");
                return DispatchOutcome::Malformed;
            }
        };
        let job_id = event.job_id.clone();

        let binding = match self.registry.resolve_and_unbind(&job_id) {
            Resolution::Bound(binding) => binding,
            Resolution::Unbound => {
                tracing::debug!(%job_id, "No client bound to completed job, dropping event");
                return DispatchOutcome::Orphan;
            }
            Resolution::Duplicate => {
                tracing::info!(%job_id, "Ignoring duplicate completion event");
                return DispatchOutcome::Duplicate;
            }
        };

        let client_id = binding.client_id;
        let conn_id = binding.conn_id;
        let frame = ServerFrame::Notification(Notification::from_event(event, binding.upload_id));
        let payload = match frame.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(%job_id, error = %e, "Failed to serialize notification");
                return DispatchOutcome::SendFailed;
            }
        };

        let outcome = self.ws_manager.send_to(&client_id, conn_id, payload).await;
        match outcome {
            SendOutcome::Delivered => {
                tracing::info!(%job_id, %client_id, "Notification delivered");
            }
            SendOutcome::NotConnected => {
                tracing::debug!(%job_id, %client_id, "Client no longer connected, notification dropped");
            }
            SendOutcome::SendFailed => {
                tracing::warn!(%job_id, %client_id, "Notification delivery failed");
            }
        }
        outcome.into()
    }
}

/// Supervisor for the single listener task.
pub struct ListenerHandle {
    cancel: CancellationToken,
    fatal: CancellationToken,
    status: ListenerStatus,
    handle: JoinHandle<Result<(), ListenerError>>,
}

impl ListenerHandle {
    /// Spawn `listener` on `subscriber`, reporting liveness through `status`.
    pub fn spawn(
        listener: CompletionListener,
        mut subscriber: Box<dyn EventSubscriber>,
        status: ListenerStatus,
    ) -> Self {
        let cancel = CancellationToken::new();
        let fatal = CancellationToken::new();
        status.set_running(true);

        let task_cancel = cancel.clone();
        let task_fatal = fatal.clone();
        let task_status = status.clone();
        let handle = tokio::spawn(async move {
            let result = listener.run(subscriber.as_mut(), task_cancel).await;
            task_status.set_running(false);
            if result.is_err() {
                task_fatal.cancel();
            }
            result
        });

        Self {
            cancel,
            fatal,
            status,
            handle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// Cancelled when the listener stops because of a fatal bus error.
    pub fn fatal(&self) -> CancellationToken {
        self.fatal.clone()
    }

    /// Cancel the listener and wait at most `grace` for it to unwind.
    ///
    /// Returns the listener's own error if it had already died.
    pub async fn shutdown(mut self, grace: Duration) -> Result<(), ListenerError> {
        self.cancel.cancel();
        match tokio::time::timeout(grace, &mut self.handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                self.status.set_running(false);
                Err(ListenerError::Aborted(join_err.to_string()))
            }
            Err(_) => {
                tracing::warn!(grace_ms = grace.as_millis() as u64, "Listener shutdown timed out");
                self.handle.abort();
                self.status.set_running(false);
                Err(ListenerError::ShutdownTimedOut(grace))
            }
        }
    }
}
