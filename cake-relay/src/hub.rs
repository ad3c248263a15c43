//! Subscriber hub
//!
//! One task owns the set of live-tail connections. Everything else talks to
//! it through [`SubscriberHub`], a cloneable handle whose calls become
//! commands on the loop's channels, so the set is never touched from two
//! places at once.
//!
//! Delivery never waits on a subscriber. A connection whose outbound channel
//! is full or closed when a broadcast arrives is dropped from the set, which
//! also closes its channel.

use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use cake_core::config::{HubConfig, MAX_CAPACITY};

use crate::error::{RelayError, Result};
use crate::metrics::RelayMetrics;

/// Identifier of a subscriber connection
pub type ConnectionId = String;

/// Outbound half of a subscriber connection
pub type MessageSender = mpsc::Sender<String>;

/// A registered connection as seen by its owner
#[derive(Debug)]
pub struct Subscription {
    pub id: ConnectionId,
    pub receiver: mpsc::Receiver<String>,
}

/// Handle to the hub event loop
#[derive(Clone)]
pub struct SubscriberHub {
    register_tx: mpsc::Sender<(ConnectionId, MessageSender)>,
    unregister_tx: mpsc::Sender<ConnectionId>,
    broadcast_tx: mpsc::Sender<String>,
    count_tx: mpsc::Sender<oneshot::Sender<usize>>,
    subscriber_buffer: usize,
}

/// The event loop behind a [`SubscriberHub`]. Drive it with [`HubLoop::run`].
pub struct HubLoop {
    register_rx: mpsc::Receiver<(ConnectionId, MessageSender)>,
    unregister_rx: mpsc::Receiver<ConnectionId>,
    broadcast_rx: mpsc::Receiver<String>,
    count_rx: mpsc::Receiver<oneshot::Sender<usize>>,
    connections: HashMap<ConnectionId, MessageSender>,
    metrics: RelayMetrics,
    cancel: CancellationToken,
}

impl SubscriberHub {
    /// Create a hub handle and the loop that serves it
    #[must_use]
    pub fn new(
        config: &HubConfig,
        metrics: RelayMetrics,
        cancel: &CancellationToken,
    ) -> (Self, HubLoop) {
        let capacity = config.command_capacity.clamp(1, MAX_CAPACITY);
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
        let (count_tx, count_rx) = mpsc::channel(capacity);

        let hub = Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
            count_tx,
            subscriber_buffer: config.subscriber_buffer.clamp(1, MAX_CAPACITY),
        };
        let event_loop = HubLoop {
            register_rx,
            unregister_rx,
            broadcast_rx,
            count_rx,
            connections: HashMap::new(),
            metrics,
            cancel: cancel.clone(),
        };
        (hub, event_loop)
    }

    /// Add a connection to the broadcast set
    pub async fn register(&self, id: ConnectionId, sender: MessageSender) -> Result<()> {
        self.register_tx
            .send((id, sender))
            .await
            .map_err(|_| RelayError::HubClosed)
    }

    /// Remove a connection and close its channel. Unknown ids are ignored.
    pub async fn unregister(&self, id: ConnectionId) {
        if self.unregister_tx.send(id).await.is_err() {
            debug!("Hub already stopped, nothing to unregister");
        }
    }

    /// Hand a message to every registered connection
    pub async fn broadcast(&self, message: String) -> Result<()> {
        self.broadcast_tx
            .send(message)
            .await
            .map_err(|_| RelayError::HubClosed)
    }

    /// Open a new connection with the configured buffer and register it
    pub async fn subscribe(&self) -> Result<Subscription> {
        let (tx, receiver) = mpsc::channel(self.subscriber_buffer);
        let id = nanoid::nanoid!();
        self.register(id.clone(), tx).await?;
        Ok(Subscription { id, receiver })
    }

    /// Number of registered connections, as seen by the loop
    pub async fn connection_count(&self) -> Result<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.count_tx
            .send(reply_tx)
            .await
            .map_err(|_| RelayError::HubClosed)?;
        reply_rx.await.map_err(|_| RelayError::HubClosed)
    }
}

impl HubLoop {
    /// Serve commands until cancelled or every handle is gone
    pub async fn run(mut self) {
        info!("Subscriber hub started");

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                registration = self.register_rx.recv() => match registration {
                    Some((id, sender)) => self.register(id, sender),
                    // All handles share their senders, so this means they are all gone.
                    None => break,
                },

                Some(id) = self.unregister_rx.recv() => self.unregister(&id),

                Some(message) = self.broadcast_rx.recv() => self.broadcast(&message),

                Some(reply) = self.count_rx.recv() => {
                    let _ = reply.send(self.connections.len());
                }
            }
        }

        self.register_rx.close();
        self.unregister_rx.close();
        self.broadcast_rx.close();
        self.count_rx.close();

        let remaining = self.connections.len();
        self.close_all();
        info!(closed = remaining, "Subscriber hub stopped");
    }

    fn register(&mut self, id: ConnectionId, sender: MessageSender) {
        if self.connections.insert(id.clone(), sender).is_none() {
            self.metrics.subscribers_connected.inc();
        }
        debug!(connection_id = %id, total = self.connections.len(), "Subscriber registered");
    }

    fn unregister(&mut self, id: &str) {
        if self.connections.remove(id).is_some() {
            self.metrics.subscribers_connected.dec();
            debug!(connection_id = %id, total = self.connections.len(), "Subscriber unregistered");
        }
    }

    fn broadcast(&mut self, message: &str) {
        self.metrics.broadcasts.inc();

        let mut stalled = Vec::new();
        for (id, sender) in &self.connections {
            if sender.try_send(message.to_string()).is_err() {
                stalled.push(id.clone());
            }
        }

        for id in stalled {
            if self.connections.remove(&id).is_some() {
                self.metrics.subscribers_connected.dec();
                self.metrics.subscribers_evicted.inc();
                debug!(connection_id = %id, "Subscriber could not keep up, dropped");
            }
        }
    }

    fn close_all(&mut self) {
        let closed = self.connections.len() as i64;
        self.metrics.subscribers_connected.sub(closed);
        self.connections.clear();
    }
}
