use async_trait::async_trait;
use tasksync_core::{RemoteError, Task, TaskId, TaskPatch};
use tokio::sync::mpsc;

/// Live snapshots of an owner's full task list.
pub type Subscription = mpsc::Receiver<Vec<Task>>;

/// The authoritative task store the client synchronizes with.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Store a new task and return the id the remote assigned.
    async fn create(&self, task: &Task) -> Result<TaskId, RemoteError>;

    async fn update(&self, id: &TaskId, patch: &TaskPatch) -> Result<(), RemoteError>;

    /// Deleting an id the remote no longer has reports `NotFound`.
    async fn delete(&self, id: &TaskId) -> Result<(), RemoteError>;

    async fn subscribe(&self, owner_id: &str) -> Result<Subscription, RemoteError>;
}
