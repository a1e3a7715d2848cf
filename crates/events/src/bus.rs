//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the single-process transport: the API binary and its
//! embedded workers share one `Arc<EventBus>`. Every subscription sees every
//! payload, which is the topology the listener requires.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::BusError;
use crate::{EventPublisher, EventSubscriber};

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// # Usage
///
/// ```rust
/// use docflow_events::EventBus;
///
/// let bus = EventBus::default();
/// let _subscription = bus.subscribe();
///
/// bus.publish_raw(r#"{"task_id":"A","status":"completed"}"#.to_string());
/// ```
pub struct EventBus {
    sender: broadcast::Sender<String>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed payloads are dropped
    /// and slow subscribers observe a transient lag error.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a payload to all current subscribers.
    ///
    /// Returns the number of subscribers that will see it. With no
    /// subscribers the payload is silently dropped.
    pub fn publish_raw(&self, payload: String) -> usize {
        // A SendError only means there are zero receivers.
        self.sender.send(payload).unwrap_or(0)
    }

    pub fn subscribe(&self) -> BusSubscription {
        BusSubscription {
            receiver: Some(self.sender.subscribe()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, payload: String) -> Result<(), BusError> {
        let receivers = self.publish_raw(payload);
        tracing::trace!(receivers, "Published to in-process event bus");
        Ok(())
    }
}

/// One subscription to an [`EventBus`].
pub struct BusSubscription {
    receiver: Option<broadcast::Receiver<String>>,
}

#[async_trait]
impl EventSubscriber for BusSubscription {
    async fn recv(&mut self, timeout: Duration) -> Result<Option<String>, BusError> {
        let receiver = self
            .receiver
            .as_mut()
            .ok_or_else(|| BusError::Permanent("subscription already closed".into()))?;

        match tokio::time::timeout(timeout, receiver.recv()).await {
            Err(_) => Ok(None),
            Ok(Ok(payload)) => Ok(Some(payload)),
            Ok(Err(broadcast::error::RecvError::Lagged(n))) => Err(BusError::Transient(format!(
                "subscriber lagged, {n} events skipped"
            ))),
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                Err(BusError::Permanent("event bus closed".into()))
            }
        }
    }

    async fn close(&mut self) -> Result<(), BusError> {
        self.receiver = None;
        Ok(())
    }
}
