use crate::remote::{RemoteStore, Subscription};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tasksync_core::protocol::{ClientMessage, ErrorCode, ServerMessage};
use tasksync_core::{RemoteError, Task, TaskId, TaskPatch};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

type PendingReplies = Arc<Mutex<HashMap<Uuid, oneshot::Sender<ServerMessage>>>>;
type Subscribers = Arc<Mutex<Vec<mpsc::Sender<Vec<Task>>>>>;

struct Connection {
    tx: mpsc::Sender<ClientMessage>,
    alive: Arc<AtomicBool>,
}

/// Remote store reached over the WebSocket protocol.
///
/// The connection is opened on first use and reopened after it drops.
/// Requests are correlated with replies by `request_id` and each one is
/// bounded by `request_timeout`.
pub struct WebSocketRemote {
    server_url: String,
    owner_id: String,
    request_timeout: Duration,
    connection: tokio::sync::Mutex<Option<Connection>>,
    pending: PendingReplies,
    subscribers: Subscribers,
    subscribed: AtomicBool,
}

impl WebSocketRemote {
    pub fn new(
        server_url: impl Into<String>,
        owner_id: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            owner_id: owner_id.into(),
            request_timeout,
            connection: tokio::sync::Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            subscribed: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .try_lock()
            .map(|c| c.as_ref().is_some_and(|c| c.alive.load(Ordering::Relaxed)))
            .unwrap_or(false)
    }

    /// Open the connection now instead of on first request.
    pub async fn connect(&self) -> Result<(), RemoteError> {
        self.sender().await.map(|_| ())
    }

    async fn sender(&self) -> Result<mpsc::Sender<ClientMessage>, RemoteError> {
        self.sender_fresh().await.map(|(tx, _)| tx)
    }

    /// The live sender, and whether the connection was opened by this call.
    async fn sender_fresh(&self) -> Result<(mpsc::Sender<ClientMessage>, bool), RemoteError> {
        let mut connection = self.connection.lock().await;
        if let Some(existing) = connection.as_ref() {
            if existing.alive.load(Ordering::Relaxed) {
                return Ok((existing.tx.clone(), false));
            }
            tracing::info!("REMOTE: Connection to {} lost, reconnecting", self.server_url);
        }

        let fresh = self.open().await?;
        let tx = fresh.tx.clone();
        *connection = Some(fresh);

        if self.subscribed.load(Ordering::SeqCst) {
            tx.send(ClientMessage::Subscribe)
                .await
                .map_err(|_| RemoteError::Unavailable("connection closed".to_string()))?;
        }
        Ok((tx, true))
    }

    async fn open(&self) -> Result<Connection, RemoteError> {
        let url = self.server_url.clone();
        let (ws_stream, _) = (|| async { connect_async(url.as_str()).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(100))
                    .with_max_delay(Duration::from_secs(2))
                    .with_max_times(3)
                    .with_jitter(),
            )
            .notify(|e, delay| {
                tracing::warn!("REMOTE: Connect failed, retrying in {:?}: {}", delay, e);
            })
            .await
            .map_err(|e| RemoteError::Unavailable(format!("connect failed: {e}")))?;

        let (mut write, mut read) = ws_stream.split();

        // Authenticate before anything else goes over the socket.
        let hello = serde_json::to_string(&ClientMessage::Authenticate {
            owner_id: self.owner_id.clone(),
        })
        .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        write
            .send(Message::Text(hello))
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

        let reply = tokio::time::timeout(self.request_timeout, async {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        return serde_json::from_str::<ServerMessage>(&text).ok();
                    }
                    Ok(Message::Close(_)) | Err(_) => return None,
                    Ok(_) => continue,
                }
            }
            None
        })
        .await
        .map_err(|_| RemoteError::Unavailable("authentication timed out".to_string()))?;

        match reply {
            Some(ServerMessage::AuthSuccess { owner_id }) => {
                tracing::info!("REMOTE: Authenticated as {} at {}", owner_id, self.server_url);
            }
            Some(ServerMessage::AuthError { reason }) => {
                return Err(RemoteError::PermissionDenied(reason));
            }
            _ => {
                return Err(RemoteError::Unavailable(
                    "no authentication reply".to_string(),
                ))
            }
        }

        let alive = Arc::new(AtomicBool::new(true));
        let (tx, mut rx) = mpsc::channel::<ClientMessage>(100);

        // Writer
        let writer_alive = alive.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("REMOTE: Failed to encode message: {}", e);
                        continue;
                    }
                };
                if write.send(Message::Text(json)).await.is_err() {
                    writer_alive.store(false, Ordering::Relaxed);
                    break;
                }
            }
        });

        // Reader
        let reader_alive = alive.clone();
        let pending = self.pending.clone();
        let subscribers = self.subscribers.clone();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let msg = match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!("REMOTE: Ignoring undecodable message: {}", e);
                        continue;
                    }
                };
                match msg {
                    ServerMessage::Snapshot { tasks } => {
                        let targets: Vec<_> = subscribers.lock().clone();
                        for subscriber in targets {
                            let _ = subscriber.send(tasks.clone()).await;
                        }
                        subscribers.lock().retain(|s| !s.is_closed());
                    }
                    ServerMessage::Pong => {}
                    other => match other.request_id() {
                        Some(id) => {
                            if let Some(reply) = pending.lock().remove(&id) {
                                let _ = reply.send(other);
                            }
                        }
                        None => tracing::warn!("REMOTE: Unsolicited message: {:?}", other),
                    },
                }
            }
            reader_alive.store(false, Ordering::Relaxed);
            // Dropping the senders fails every request still waiting.
            pending.lock().clear();
            tracing::warn!("REMOTE: Connection closed");
        });

        Ok(Connection { tx, alive })
    }

    async fn request(&self, request_id: Uuid, message: ClientMessage) -> Result<ServerMessage, RemoteError> {
        let tx = self.sender().await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().insert(request_id, reply_tx);

        if tx.send(message).await.is_err() {
            self.pending.lock().remove(&request_id);
            return Err(RemoteError::Unavailable("connection closed".to_string()));
        }

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(RemoteError::Unavailable(
                "connection closed before reply".to_string(),
            )),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(RemoteError::Unavailable(format!(
                    "request timed out after {:?}",
                    self.request_timeout
                )))
            }
        }
    }
}

/// Error for a reply that is not the expected acknowledgement of a request
/// about `task_id`.
fn reply_error(reply: ServerMessage, task_id: &TaskId) -> RemoteError {
    match reply {
        ServerMessage::Error { code, message, .. } => match code {
            ErrorCode::InvalidAuth | ErrorCode::PermissionDenied => {
                RemoteError::PermissionDenied(message)
            }
            ErrorCode::NotFound => RemoteError::NotFound(task_id.clone()),
            ErrorCode::InvalidMessage | ErrorCode::ServerError => RemoteError::Unavailable(message),
        },
        other => RemoteError::Unavailable(format!("unexpected reply: {other:?}")),
    }
}

#[async_trait]
impl RemoteStore for WebSocketRemote {
    async fn create(&self, task: &Task) -> Result<TaskId, RemoteError> {
        let request_id = Uuid::new_v4();
        let reply = self
            .request(
                request_id,
                ClientMessage::CreateTask {
                    request_id,
                    task: task.clone(),
                },
            )
            .await?;
        match reply {
            ServerMessage::TaskCreated { task_id, .. } => Ok(task_id),
            other => Err(reply_error(other, &task.id)),
        }
    }

    async fn update(&self, id: &TaskId, patch: &TaskPatch) -> Result<(), RemoteError> {
        let request_id = Uuid::new_v4();
        let reply = self
            .request(
                request_id,
                ClientMessage::UpdateTask {
                    request_id,
                    task_id: id.clone(),
                    patch: patch.clone(),
                },
            )
            .await?;
        match reply {
            ServerMessage::TaskUpdated { .. } => Ok(()),
            other => Err(reply_error(other, id)),
        }
    }

    async fn delete(&self, id: &TaskId) -> Result<(), RemoteError> {
        let request_id = Uuid::new_v4();
        let reply = self
            .request(
                request_id,
                ClientMessage::DeleteTask {
                    request_id,
                    task_id: id.clone(),
                },
            )
            .await?;
        match reply {
            ServerMessage::TaskDeleted { .. } => Ok(()),
            other => Err(reply_error(other, id)),
        }
    }

    async fn subscribe(&self, owner_id: &str) -> Result<Subscription, RemoteError> {
        if owner_id != self.owner_id {
            return Err(RemoteError::PermissionDenied(format!(
                "connection is authenticated as {}",
                self.owner_id
            )));
        }
        let (tx, rx) = mpsc::channel(16);
        self.subscribers.lock().push(tx);

        self.subscribed.store(true, Ordering::SeqCst);
        let (sender, fresh) = self.sender_fresh().await?;
        // A fresh connection has already subscribed.
        if !fresh {
            sender
                .send(ClientMessage::Subscribe)
                .await
                .map_err(|_| RemoteError::Unavailable("connection closed".to_string()))?;
        }
        Ok(rx)
    }
}
