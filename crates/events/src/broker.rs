//! Redis pub/sub transport for multi-process deployments.
//!
//! Pub/sub is broadcast: every subscribed front-end instance receives every
//! completion event, which is the only topology the listener supports.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;

use crate::error::BusError;
use crate::{EventPublisher, EventSubscriber};

/// Handle on a Redis server and the completion channel name.
#[derive(Clone)]
pub struct RedisEventBus {
    client: redis::Client,
    channel: String,
}

impl RedisEventBus {
    pub fn new(url: &str, channel: impl Into<String>) -> Result<Self, BusError> {
        let client = redis::Client::open(url)
            .map_err(|e| BusError::Permanent(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn publisher(&self) -> Result<RedisPublisher, BusError> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(RedisPublisher {
            conn,
            channel: self.channel.clone(),
        })
    }

    pub async fn subscribe(&self) -> Result<RedisSubscription, BusError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        tracing::info!(channel = %self.channel, "Subscribed to redis completion channel");
        Ok(RedisSubscription {
            pubsub: Some(pubsub),
            channel: self.channel.clone(),
        })
    }
}

/// Publishes payloads with `PUBLISH`.
pub struct RedisPublisher {
    conn: redis::aio::MultiplexedConnection,
    channel: String,
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish(&self, payload: String) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(&self.channel, payload).await?;
        if receivers == 0 {
            tracing::debug!(channel = %self.channel, "Completion published with no subscribers");
        }
        Ok(())
    }
}

/// A live `SUBSCRIBE` on the completion channel.
pub struct RedisSubscription {
    pubsub: Option<redis::aio::PubSub>,
    channel: String,
}

#[async_trait]
impl EventSubscriber for RedisSubscription {
    async fn recv(&mut self, timeout: Duration) -> Result<Option<String>, BusError> {
        let pubsub = self
            .pubsub
            .as_mut()
            .ok_or_else(|| BusError::Permanent("subscription already closed".into()))?;

        let next = {
            let mut messages = pubsub.on_message();
            tokio::time::timeout(timeout, messages.next()).await
        };

        match next {
            Err(_) => Ok(None),
            Ok(None) => Err(BusError::Permanent("redis pub/sub stream ended".into())),
            // Non-UTF-8 payloads are handed on lossily; schema validation drops them.
            Ok(Some(msg)) => Ok(Some(
                String::from_utf8_lossy(msg.get_payload_bytes()).into_owned(),
            )),
        }
    }

    async fn close(&mut self) -> Result<(), BusError> {
        if let Some(mut pubsub) = self.pubsub.take() {
            pubsub.unsubscribe(&self.channel).await?;
            tracing::info!(channel = %self.channel, "Unsubscribed from redis completion channel");
        }
        Ok(())
    }
}
