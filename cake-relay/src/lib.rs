//! Asynchronous audit relay
//!
//! Audit lines submitted by the HTTP layer are published to a message broker
//! by a bounded pool of workers, consumed back and fanned out to live-tail
//! subscribers.

pub mod broker;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod pool;
pub mod receiver;
pub mod relay;
pub mod slots;

pub use broker::{Broker, Publisher};
pub use error::{RelayError, Result};
pub use hub::{ConnectionId, SubscriberHub, Subscription};
pub use metrics::RelayMetrics;
pub use pool::{PublisherPool, BUFFER_MULTIPLIER};
pub use relay::{AuditRelay, AuditSender};
pub use slots::{SlotGuard, SlotPool};
