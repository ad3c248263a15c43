//! Live-tail WebSocket endpoint
//!
//! Each connection registers with the subscriber hub and receives every audit
//! line as a text frame. A client that falls behind is dropped by the hub,
//! which ends the writer task and closes the socket.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info};

use cake_relay::{SubscriberHub, Subscription};

use crate::http::{AppError, AppState};
use crate::observability::metrics;

/// Upgrade to a live-tail connection
///
/// The subscription is taken before the upgrade is checked, so a stopped
/// relay is reported as 503 for any request instead of an immediately closed
/// socket.
pub async fn live_tail_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    let subscription = state.hub.subscribe().await?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            state.hub.unregister(subscription.id).await;
            return Ok(rejection.into_response());
        }
    };

    // Clients only listen; inbound frames are control traffic.
    Ok(ws
        .max_message_size(64 * 1024)
        .on_upgrade(move |socket| handle_socket(socket, state.hub, subscription))
        .into_response())
}

async fn handle_socket(socket: WebSocket, hub: SubscriberHub, subscription: Subscription) {
    let Subscription {
        id,
        receiver: mut lines,
    } = subscription;

    metrics::LIVE_TAIL_CONNECTIONS_TOTAL.inc();
    info!(connection_id = %id, "Live tail connection established");

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Hub -> WebSocket
    let writer_id = id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            if let Err(e) = ws_sink.send(Message::Text(line.into())).await {
                debug!(connection_id = %writer_id, error = %e, "Failed to send live tail frame");
                return;
            }
        }
        let _ = ws_sink.send(Message::Close(None)).await;
    });

    // WebSocket -> nowhere, until the client goes away
    let mut reader = tokio::spawn(async move {
        while let Some(frame) = ws_stream.next().await {
            match frame {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    hub.unregister(id.clone()).await;
    info!(connection_id = %id, "Live tail connection closed");
}
