//! WebSocket handler for the live player list.
//!
//! Handles WebSocket connections: sends the current list, then relays every
//! delivered batch while answering client messages.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::websocket::{BatchBroadcaster, ClientMessage, ConnectionManager, ServerMessage};

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection and queues the current list
/// 2. Relays every later batch behind it
/// 3. Spawns a task to forward outgoing messages
/// 4. Processes incoming messages in a loop
/// 5. Cleans up on disconnect
pub async fn handle_websocket_connection(
    socket: WebSocket,
    broadcaster: Arc<BatchBroadcaster>,
    conn_manager: Arc<ConnectionManager>,
) {
    // Split the socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create channel for sending messages to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let conn_id = broadcaster.connect(tx);

    tracing::info!(conn_id = %conn_id, "WebSocket client connected");

    // Spawn task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    // Process incoming messages
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                respond(&text, &conn_id, &broadcaster, &conn_manager);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(data)) => {
                // Axum answers pings itself
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    // Clean up
    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message and queue the reply.
fn respond(
    text: &str,
    conn_id: &str,
    broadcaster: &BatchBroadcaster,
    conn_manager: &ConnectionManager,
) {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            conn_manager.send_to(
                conn_id,
                ServerMessage::error(format!("Invalid message format: {}", e)),
            );
            return;
        }
    };

    match client_msg {
        // Through the broadcaster, so the reply stays ordered with batches
        ClientMessage::Snapshot => {
            broadcaster.send_snapshot(conn_id);
        }
        ClientMessage::Ping => {
            conn_manager.send_to(conn_id, ServerMessage::Pong);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_engine::Snapshot;

    #[test]
    fn test_respond() {
        let conn_manager = ConnectionManager::new_shared();
        let broadcaster = BatchBroadcaster::new(conn_manager.clone());
        broadcaster.reset(4, Snapshot::single(vec![]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn_id = broadcaster.connect(tx);
        rx.try_recv().unwrap();

        respond(r#"{"type":"ping"}"#, &conn_id, &broadcaster, &conn_manager);
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Pong));

        respond(r#"{"type":"snapshot"}"#, &conn_id, &broadcaster, &conn_manager);
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerMessage::Snapshot { generation: 4, ref sections } if sections.len() == 1
        ));

        respond("not json", &conn_id, &broadcaster, &conn_manager);
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Error { .. }));
    }
}
