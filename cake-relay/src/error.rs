//! Error types for the audit relay

use thiserror::Error;

/// Relay error types
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to connect to broker: {0}")]
    Connect(String),

    #[error("Failed to declare destination {destination}: {reason}")]
    Declare { destination: String, reason: String },

    #[error("Failed to publish message: {0}")]
    Publish(String),

    #[error("Failed to consume from broker: {0}")]
    Consume(String),

    #[error("Publisher pool is closed")]
    PoolClosed,

    #[error("Subscriber hub is closed")]
    HubClosed,

    #[error("Slot {0} is not checked out")]
    InvalidSlot(usize),
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
