pub mod store;
pub mod sync_handler;
pub mod websocket;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
    routing::get,
    Router,
};
use dashmap::DashMap;
use std::sync::Arc;
use store::TaskStore;
use tasksync_core::protocol::ServerMessage;
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

// Subscribed connections per owner: owner_id -> [(connection_id, channel)]
pub type SubscriberRegistry = Arc<DashMap<String, Vec<(Uuid, mpsc::Sender<ServerMessage>)>>>;

#[derive(Clone, Default)]
pub struct AppState {
    pub store: Arc<TaskStore>,
    pub subscribers: SubscriberRegistry,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, owner_id: &str, connection_id: Uuid, tx: mpsc::Sender<ServerMessage>) {
        let mut subscribed = self.subscribers.entry(owner_id.to_string()).or_default();
        if !subscribed.iter().any(|(id, _)| *id == connection_id) {
            subscribed.push((connection_id, tx));
        }
        tracing::info!(
            "SERVER: Owner {} now has {} subscribed connections",
            owner_id,
            subscribed.len()
        );
    }

    pub fn unsubscribe(&self, owner_id: &str, connection_id: Uuid) {
        if let Some(mut subscribed) = self.subscribers.get_mut(owner_id) {
            subscribed.retain(|(id, _)| *id != connection_id);
            if subscribed.is_empty() {
                drop(subscribed); // Release the lock
                self.subscribers.remove(owner_id);
                tracing::debug!("SERVER: No more subscribers for {}", owner_id);
            }
        }
    }

    /// Push the owner's current task list to every subscribed connection.
    pub async fn broadcast(&self, owner_id: &str) {
        let targets: Vec<_> = self
            .subscribers
            .get(owner_id)
            .map(|subscribed| subscribed.iter().map(|(_, tx)| tx.clone()).collect())
            .unwrap_or_default();
        if targets.is_empty() {
            return;
        }

        let tasks = self.store.snapshot(owner_id);
        tracing::debug!(
            "SERVER: Broadcasting {} tasks to {} connections of {}",
            tasks.len(),
            targets.len(),
            owner_id
        );
        for tx in targets {
            if tx
                .send(ServerMessage::Snapshot {
                    tasks: tasks.clone(),
                })
                .await
                .is_err()
            {
                tracing::warn!("SERVER: Dropping snapshot for a closed connection of {}", owner_id);
            }
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(|| async { "OK" }))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| websocket::handle_websocket(socket, state))
}
