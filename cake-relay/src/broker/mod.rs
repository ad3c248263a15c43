//! Broker link
//!
//! The sender side opens one [`Publisher`] and the receiver side one
//! [`Deliveries`] stream, each over its own connection, against a single named
//! destination. Both are opened once per process; there is no reconnection.
//! Publishing carries plain text with no headers and no confirmation, and
//! consumption is auto-acknowledged, so delivery is at-most-once.

pub mod amqp;
pub mod memory;
pub mod redis_pubsub;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

use cake_core::config::{BrokerConfig, BrokerKind};

use crate::error::Result;

pub use amqp::AmqpBroker;
pub use memory::MemoryBroker;
pub use redis_pubsub::RedisBroker;

/// Messages delivered to the receiver side, already acknowledged
pub type Deliveries = BoxStream<'static, Result<String>>;

/// Outbound half of the broker link
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Send one text payload to the destination
    async fn publish(&self, payload: &str) -> Result<()>;
}

/// A message broker holding one named destination
#[async_trait]
pub trait Broker: Send + Sync {
    /// Short backend name for logs
    fn kind(&self) -> &'static str;

    /// Name of the queue or channel both sides use
    fn destination(&self) -> &str;

    /// Connect, declare the destination and return a publisher bound to it
    async fn open_publisher(&self) -> Result<Arc<dyn Publisher>>;

    /// Connect, declare the destination and start consuming from it
    async fn open_consumer(&self) -> Result<Deliveries>;
}

/// Build the broker selected by configuration. Nothing is connected yet.
pub fn from_config(config: &BrokerConfig) -> Result<Arc<dyn Broker>> {
    let broker: Arc<dyn Broker> = match config.kind {
        BrokerKind::Amqp => Arc::new(AmqpBroker::new(&config.url, &config.destination)),
        BrokerKind::Redis => Arc::new(RedisBroker::new(&config.url, &config.destination)?),
        BrokerKind::Memory => Arc::new(MemoryBroker::new(&config.destination)),
    };
    Ok(broker)
}
