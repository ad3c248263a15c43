//! Broker consumer feeding the subscriber hub

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::Deliveries;
use crate::hub::SubscriberHub;

/// Forward every delivered payload, unchanged, to the hub.
///
/// Returns when cancelled, when the delivery stream ends, or when the hub has
/// stopped. Delivery errors are logged and skipped.
pub async fn run(mut deliveries: Deliveries, hub: SubscriberHub, cancel: CancellationToken) {
    info!("Audit receiver started");
    let mut forwarded: u64 = 0;

    loop {
        let delivery = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!(forwarded = forwarded, "Audit receiver cancelled");
                return;
            }
            delivery = deliveries.next() => delivery,
        };

        match delivery {
            Some(Ok(payload)) => {
                if hub.broadcast(payload).await.is_err() {
                    info!(forwarded = forwarded, "Subscriber hub stopped, receiver exiting");
                    return;
                }
                forwarded += 1;
            }
            Some(Err(e)) => {
                warn!(error = %e, "Failed to receive audit line");
            }
            None => {
                warn!(forwarded = forwarded, "Broker delivery stream ended");
                return;
            }
        }
    }
}
