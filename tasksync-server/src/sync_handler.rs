use crate::AppState;
use std::sync::Arc;
use tasksync_core::protocol::{ClientMessage, ErrorCode, ServerMessage};
use tasksync_core::ServerError;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Handles the messages of one authenticated connection.
pub struct SyncHandler {
    state: Arc<AppState>,
    tx: mpsc::Sender<ServerMessage>,
    owner_id: String,
    connection_id: Uuid,
}

impl SyncHandler {
    pub fn new(
        state: Arc<AppState>,
        tx: mpsc::Sender<ServerMessage>,
        owner_id: String,
        connection_id: Uuid,
    ) -> Self {
        Self {
            state,
            tx,
            owner_id,
            connection_id,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub async fn handle_message(&mut self, msg: ClientMessage) -> Result<(), ServerError> {
        let owner = self.owner_id.clone();

        match msg {
            ClientMessage::CreateTask { request_id, task } => {
                let local_id = task.id.clone();
                match self.state.store.create(&owner, task) {
                    Ok(created) => {
                        tracing::info!(
                            "SERVER: Created {} for {} (client id {})",
                            created.id,
                            owner,
                            local_id
                        );
                        self.send(ServerMessage::TaskCreated {
                            request_id,
                            task_id: created.id,
                        })
                        .await?;
                        self.state.broadcast(&owner).await;
                    }
                    Err(e) => {
                        self.send(ServerMessage::error(
                            Some(request_id),
                            ErrorCode::PermissionDenied,
                            e.to_string(),
                        ))
                        .await?;
                    }
                }
            }

            ClientMessage::UpdateTask {
                request_id,
                task_id,
                patch,
            } => match self.state.store.update(&owner, &task_id, &patch) {
                Ok(_) => {
                    tracing::info!("SERVER: Updated {} for {}", task_id, owner);
                    self.send(ServerMessage::TaskUpdated {
                        request_id,
                        task_id,
                    })
                    .await?;
                    self.state.broadcast(&owner).await;
                }
                Err(ServerError::NotFound(id)) => {
                    tracing::warn!("SERVER: Update of unknown task {} from {}", id, owner);
                    self.send(ServerMessage::error(
                        Some(request_id),
                        ErrorCode::NotFound,
                        format!("Task {id} not found"),
                    ))
                    .await?;
                }
                Err(e) => return Err(e),
            },

            ClientMessage::DeleteTask {
                request_id,
                task_id,
            } => {
                let removed = self.state.store.delete(&owner, &task_id);
                tracing::info!(
                    "SERVER: Delete of {} for {} (existed: {})",
                    task_id,
                    owner,
                    removed
                );
                self.send(ServerMessage::TaskDeleted {
                    request_id,
                    task_id,
                })
                .await?;
                if removed {
                    self.state.broadcast(&owner).await;
                }
            }

            ClientMessage::Subscribe => {
                self.state
                    .subscribe(&owner, self.connection_id, self.tx.clone());
                self.send(ServerMessage::Snapshot {
                    tasks: self.state.store.snapshot(&owner),
                })
                .await?;
            }

            ClientMessage::Ping => {
                self.send(ServerMessage::Pong).await?;
            }

            ClientMessage::Authenticate { .. } => {
                self.send(ServerMessage::error(
                    None,
                    ErrorCode::InvalidMessage,
                    "Already authenticated",
                ))
                .await?;
            }
        }

        Ok(())
    }

    async fn send(&self, msg: ServerMessage) -> Result<(), ServerError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| ServerError::ConnectionClosed)
    }
}
