//! Audit relay service
//!
//! Single entry point for the pipeline:
//! - Sender side: intake channel -> publisher pool -> broker
//! - Receiver side: broker -> receiver -> subscriber hub
//!
//! Each side opens its own broker connection in the background. If one fails
//! to connect the error is logged and that side stops; request handling is
//! never affected. All tasks share one cancellation token.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use cake_core::config::MAX_CAPACITY;
use cake_core::Config;

use crate::broker::Broker;
use crate::error::{RelayError, Result};
use crate::hub::SubscriberHub;
use crate::metrics::RelayMetrics;
use crate::pool::PublisherPool;
use crate::receiver;

/// Cheap handle used by request middleware to queue audit lines
#[derive(Clone)]
pub struct AuditSender {
    intake: mpsc::Sender<String>,
}

impl AuditSender {
    /// Queue one audit line.
    ///
    /// Waits only while the intake channel is full. Fails with
    /// [`RelayError::PoolClosed`] once the sender side has stopped.
    pub async fn submit(&self, line: String) -> Result<()> {
        self.intake
            .send(line)
            .await
            .map_err(|_| RelayError::PoolClosed)
    }

    /// Whether the sender side is still accepting lines
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.intake.is_closed()
    }
}

/// Running audit pipeline
pub struct AuditRelay {
    sender: AuditSender,
    hub: SubscriberHub,
    metrics: RelayMetrics,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl AuditRelay {
    /// Spawn the hub, the sender side and the receiver side.
    ///
    /// Must be called inside a Tokio runtime. The pool capacity must already
    /// be validated; a zero capacity stops the sender side with an error log.
    pub fn start(
        config: &Config,
        broker: Arc<dyn Broker>,
        metrics: RelayMetrics,
        cancel: &CancellationToken,
    ) -> Self {
        let cancel = cancel.child_token();
        let tasks = TaskTracker::new();

        let (hub, hub_loop) = SubscriberHub::new(&config.hub, metrics.clone(), &cancel);
        tasks.spawn(hub_loop.run());

        let intake_capacity = config.pool.intake_capacity.clamp(1, MAX_CAPACITY);
        let (intake_tx, intake_rx) = mpsc::channel(intake_capacity);
        tasks.spawn(run_sender(
            Arc::clone(&broker),
            config.pool.capacity,
            intake_rx,
            metrics.clone(),
            cancel.clone(),
        ));
        tasks.spawn(run_receiver(broker.clone(), hub.clone(), cancel.clone()));
        tasks.close();

        info!(
            broker = broker.kind(),
            destination = %broker.destination(),
            pool_capacity = config.pool.capacity,
            "Audit relay started"
        );

        Self {
            sender: AuditSender { intake: intake_tx },
            hub,
            metrics,
            cancel,
            tasks,
        }
    }

    /// Handle for queueing audit lines
    #[must_use]
    pub fn sender(&self) -> AuditSender {
        self.sender.clone()
    }

    /// Handle to the live-tail subscriber hub
    #[must_use]
    pub fn hub(&self) -> SubscriberHub {
        self.hub.clone()
    }

    #[must_use]
    pub const fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Cancel every relay task and wait for them to finish
    pub async fn shutdown(&self) {
        info!("Shutting down audit relay");
        self.cancel.cancel();
        self.tasks.wait().await;
        info!("Audit relay stopped");
    }
}

async fn run_sender(
    broker: Arc<dyn Broker>,
    capacity: usize,
    mut intake: mpsc::Receiver<String>,
    metrics: RelayMetrics,
    cancel: CancellationToken,
) {
    let publisher = tokio::select! {
        () = cancel.cancelled() => return,
        opened = broker.open_publisher() => match opened {
            Ok(publisher) => publisher,
            Err(e) => {
                error!(error = %e, "Audit sender could not reach the broker, audit lines will be dropped");
                return;
            }
        },
    };

    let pool = match PublisherPool::new(capacity, publisher, metrics, &cancel) {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "Failed to create publisher pool");
            return;
        }
    };

    loop {
        let line = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            line = intake.recv() => line,
        };

        let Some(line) = line else {
            debug!("Audit intake closed");
            break;
        };
        if pool.submit(line).await.is_err() {
            break;
        }
    }

    intake.close();
    pool.shutdown().await;
}

async fn run_receiver(broker: Arc<dyn Broker>, hub: SubscriberHub, cancel: CancellationToken) {
    let deliveries = tokio::select! {
        () = cancel.cancelled() => return,
        opened = broker.open_consumer() => match opened {
            Ok(deliveries) => deliveries,
            Err(e) => {
                error!(error = %e, "Audit receiver could not reach the broker, live tail disabled");
                return;
            }
        },
    };

    receiver::run(deliveries, hub, cancel).await;
}
