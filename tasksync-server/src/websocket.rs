use crate::{sync_handler::SyncHandler, AppState};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tasksync_core::protocol::{ClientMessage, ErrorCode, ServerMessage};
use uuid::Uuid;

pub async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4();

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<ServerMessage>(100);

    // Spawn task to forward messages to WebSocket
    tokio::spawn(async move {
        tracing::debug!("SERVER: Sender task started for connection {}", connection_id);
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("SERVER: Failed to encode message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                tracing::error!(
                    "SERVER: Failed to send WebSocket message to connection {}",
                    connection_id
                );
                break;
            }
        }
        tracing::debug!("SERVER: Sender task terminated for connection {}", connection_id);
    });

    let mut handler: Option<SyncHandler> = None;

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let client_msg = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(client_msg) => client_msg,
            Err(e) => {
                tracing::error!("SERVER: Failed to parse client message: {}", e);
                let _ = tx
                    .send(ServerMessage::error(
                        None,
                        ErrorCode::InvalidMessage,
                        format!("Invalid JSON: {e}"),
                    ))
                    .await;
                continue;
            }
        };

        let Some(active) = handler.as_mut() else {
            match client_msg {
                ClientMessage::Authenticate { owner_id } if !owner_id.trim().is_empty() => {
                    tracing::info!(
                        "SERVER: Connection {} authenticated as {}",
                        connection_id,
                        owner_id
                    );
                    let _ = tx
                        .send(ServerMessage::AuthSuccess {
                            owner_id: owner_id.clone(),
                        })
                        .await;
                    handler = Some(SyncHandler::new(
                        state.clone(),
                        tx.clone(),
                        owner_id,
                        connection_id,
                    ));
                    continue;
                }
                ClientMessage::Authenticate { .. } => {
                    let _ = tx
                        .send(ServerMessage::AuthError {
                            reason: "Missing owner id".to_string(),
                        })
                        .await;
                }
                _ => {
                    // Require authentication first
                    let _ = tx
                        .send(ServerMessage::AuthError {
                            reason: "Not authenticated".to_string(),
                        })
                        .await;
                }
            }
            break;
        };

        if let Err(e) = active.handle_message(client_msg).await {
            tracing::error!("SERVER: Error handling message: {}", e);
            let _ = tx
                .send(ServerMessage::error(
                    None,
                    ErrorCode::ServerError,
                    format!("Failed to process message: {e}"),
                ))
                .await;
        }
    }

    // Clean up on disconnect
    if let Some(handler) = handler {
        tracing::debug!(
            "SERVER: Connection {} of {} disconnecting",
            connection_id,
            handler.owner_id()
        );
        state.unsubscribe(handler.owner_id(), connection_id);
    }
}
