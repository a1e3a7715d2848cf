//! Docflow event bus.
//!
//! Workers publish [`CompletionEvent`](docflow_core::job_events::CompletionEvent)s
//! and every front-end instance subscribes. Delivery is broadcast: each
//! subscriber sees every payload and drops the ones it has no use for.
//!
//! - [`EventPublisher`] / [`EventSubscriber`]: the seams the rest of the
//!   workspace depends on.
//! - [`EventBus`]: in-process bus backed by `tokio::sync::broadcast`.
//! - [`RedisEventBus`]: Redis pub/sub for multi-process deployments.
//!
//! Payloads travel as raw strings so that schema validation stays with the
//! consumer; a malformed payload is the listener's problem, not the bus's.

pub mod broker;
pub mod bus;
pub mod error;

use std::time::Duration;

use async_trait::async_trait;
use docflow_core::job_events::CompletionEvent;

pub use broker::{RedisEventBus, RedisPublisher, RedisSubscription};
pub use bus::{BusSubscription, EventBus};
pub use error::BusError;

/// Publishing half of the bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, payload: String) -> Result<(), BusError>;
}

/// Subscribing half of the bus, owned by exactly one consumer task.
#[async_trait]
pub trait EventSubscriber: Send {
    /// Wait at most `timeout` for the next payload.
    ///
    /// `Ok(None)` means the window elapsed with nothing to read.
    async fn recv(&mut self, timeout: Duration) -> Result<Option<String>, BusError>;

    /// Release the subscription. Further `recv` calls fail permanently.
    async fn close(&mut self) -> Result<(), BusError>;
}

/// Serialize and publish a completion event.
pub async fn publish_completion(
    publisher: &dyn EventPublisher,
    event: &CompletionEvent,
) -> Result<(), BusError> {
    let payload = event
        .to_json()
        .map_err(|e| BusError::Permanent(format!("unserializable completion event: {e}")))?;
    publisher.publish(payload).await
}
