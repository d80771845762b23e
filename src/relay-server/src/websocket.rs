//! WebSocket transport.
//!
//! Every connection gets its own session bridge. Inbound text frames are
//! decoded into client messages; everything the bridge produces is written
//! back, one JSON object per text frame, by a single sender task so ordering
//! is preserved.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use relay_engine::{BridgeError, SessionBridge};
use relay_protocol::{ClientMessage, ServerMessage, decode_client_message};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Create WebSocket and health routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(websocket_handler))
        .route("/health", get(health))
}

/// Health check body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Handle WebSocket upgrade.
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4().to_string();
    info!(connection_id = %connection_id, "Client connected");

    let (sender, receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<ServerMessage>();

    let sender_task = tokio::spawn(handle_sender(sender, rx));

    let bridge = state
        .registry
        .create_session(&connection_id, state.query_options(), tx.clone())
        .await;

    handle_receiver(receiver, &tx, &bridge, &connection_id).await;

    // Cleanup
    state.registry.remove(&connection_id).await;
    sender_task.abort();
    info!(connection_id = %connection_id, "Client disconnected");
}

/// Write outbound messages in order.
async fn handle_sender(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
) {
    while let Some(msg) = rx.recv().await {
        let text = match serde_json::to_string(&msg) {
            Ok(t) => t,
            Err(e) => {
                error!("Failed to serialize message: {}", e);
                continue;
            }
        };

        if let Err(e) = sender.send(Message::Text(text.into())).await {
            debug!("Failed to send message: {}", e);
            break;
        }
    }
}

/// Handle incoming frames until the client goes away.
async fn handle_receiver(
    mut receiver: SplitStream<WebSocket>,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    bridge: &Arc<SessionBridge>,
    connection_id: &str,
) {
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!(connection_id = %connection_id, "WebSocket receive error: {}", e);
                break;
            }
        };

        match msg {
            Message::Text(text) => handle_text_message(text.as_str(), tx, bridge, connection_id),
            Message::Binary(data) => {
                debug!(connection_id = %connection_id, "Ignoring binary message: {} bytes", data.len());
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                debug!(connection_id = %connection_id, "WebSocket close requested");
                break;
            }
        }
    }
}

/// Handle a text message.
fn handle_text_message(
    text: &str,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    bridge: &Arc<SessionBridge>,
    connection_id: &str,
) {
    let message = match decode_client_message(text) {
        Ok(message) => message,
        Err(reply) => {
            debug!(connection_id = %connection_id, "Rejected client message");
            let _ = tx.send(reply);
            return;
        }
    };

    match message {
        ClientMessage::Prompt { text } => {
            debug!(connection_id = %connection_id, chars = text.len(), "Prompt received");
            bridge.push_prompt(text);
        }
        ClientMessage::Interrupt => {
            // Waiting for the acknowledgment must not block later frames.
            let bridge = Arc::clone(bridge);
            let connection_id = connection_id.to_string();
            tokio::spawn(async move {
                match bridge.interrupt().await {
                    Ok(()) => debug!(connection_id = %connection_id, "Interrupted"),
                    Err(BridgeError::Closed) => {
                        debug!(connection_id = %connection_id, "Interrupt after close ignored");
                    }
                    Err(e) => warn!(connection_id = %connection_id, error = %e, "Interrupt failed"),
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_body() {
        let Json(body) = health().await;
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"status": "ok"})
        );
    }
}
