//! In-process broker
//!
//! Messages published before the consumer attaches are queued, like a
//! declared queue on a real broker. Only one consumer may attach.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{Broker, Deliveries, Publisher};
use crate::error::{RelayError, Result};

pub struct MemoryBroker {
    destination: String,
    tx: mpsc::UnboundedSender<String>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new(destination: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            destination: destination.to_string(),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn destination(&self) -> &str {
        &self.destination
    }

    async fn open_publisher(&self) -> Result<Arc<dyn Publisher>> {
        Ok(Arc::new(MemoryPublisher {
            tx: self.tx.clone(),
        }))
    }

    async fn open_consumer(&self) -> Result<Deliveries> {
        let rx = self.rx.lock().take().ok_or_else(|| {
            RelayError::Consume(format!(
                "a consumer is already attached to {}",
                self.destination
            ))
        })?;

        Ok(UnboundedReceiverStream::new(rx).map(Ok).boxed())
    }
}

struct MemoryPublisher {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, payload: &str) -> Result<()> {
        self.tx
            .send(payload.to_string())
            .map_err(|_| RelayError::Publish("consumer has gone away".to_string()))
    }
}
