//! Redis Pub/Sub backend
//!
//! The destination is a Pub/Sub channel. Pub/Sub keeps nothing for absent
//! subscribers, which matches the non-durable, at-most-once contract of the
//! relay: lines published while the receiver is down are lost.

use async_trait::async_trait;
use futures::StreamExt;
use redis::{AsyncCommands, Client as RedisClient};
use std::sync::Arc;
use tracing::{debug, info};

use super::{Broker, Deliveries, Publisher};
use crate::error::{RelayError, Result};

pub struct RedisBroker {
    redis_client: RedisClient,
    channel: String,
}

impl RedisBroker {
    /// Parse the URL and prepare a client; no connection is made yet
    pub fn new(redis_url: &str, channel: &str) -> Result<Self> {
        let redis_client = RedisClient::open(redis_url)
            .map_err(|e| RelayError::Configuration(format!("invalid Redis URL: {e}")))?;

        Ok(Self {
            redis_client,
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    fn kind(&self) -> &'static str {
        "redis"
    }

    fn destination(&self) -> &str {
        &self.channel
    }

    async fn open_publisher(&self) -> Result<Arc<dyn Publisher>> {
        let conn = self
            .redis_client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RelayError::Connect(format!("sender: {e}")))?;

        info!(channel = %self.channel, "Redis publisher connected");
        Ok(Arc::new(RedisPublisher {
            conn,
            channel: self.channel.clone(),
        }))
    }

    async fn open_consumer(&self) -> Result<Deliveries> {
        let mut pubsub = self
            .redis_client
            .get_async_pubsub()
            .await
            .map_err(|e| RelayError::Connect(format!("receiver: {e}")))?;

        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| RelayError::Declare {
                destination: self.channel.clone(),
                reason: e.to_string(),
            })?;

        info!(channel = %self.channel, "Redis subscriber connected");

        let deliveries = pubsub.into_on_message().map(|msg| {
            msg.get_payload::<String>()
                .map_err(|e| RelayError::Consume(format!("invalid payload: {e}")))
        });
        Ok(deliveries.boxed())
    }
}

struct RedisPublisher {
    conn: redis::aio::MultiplexedConnection,
    channel: String,
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&self, payload: &str) -> Result<()> {
        // Multiplexed connections are cheap handles; each call gets its own.
        let mut conn = self.conn.clone();
        let subscribers: usize = conn
            .publish(&self.channel, payload)
            .await
            .map_err(|e| RelayError::Publish(e.to_string()))?;

        debug!(
            channel = %self.channel,
            subscribers = subscribers,
            "Published audit line"
        );
        Ok(())
    }
}
