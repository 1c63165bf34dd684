use crate::cache::{LocalCache, PendingChangesCollection, PendingTasksCollection, TasksCollection};
use crate::clock::Clock;
use crate::effects::SideEffects;
use crate::events::{EventDispatcher, SyncEvent};
use crate::projection::Projection;
use crate::remote::RemoteStore;
use parking_lot::RwLock;
use std::sync::Arc;
use tasksync_core::{ClientError, PendingChange, PendingTask, SyncResult, Task, TaskId};
use tokio::sync::watch;

/// The signed-in owner, if any.
#[derive(Debug, Default)]
pub struct Session {
    owner_id: RwLock<Option<String>>,
}

impl Session {
    pub fn new(owner_id: Option<String>) -> Self {
        Self {
            owner_id: RwLock::new(owner_id),
        }
    }

    pub fn sign_in(&self, owner_id: impl Into<String>) {
        *self.owner_id.write() = Some(owner_id.into());
    }

    pub fn sign_out(&self) {
        *self.owner_id.write() = None;
    }

    pub fn owner_id(&self) -> Option<String> {
        self.owner_id.read().clone()
    }
}

/// Shared state handed to the pipeline, the reconciler and the background
/// tasks of a client.
#[derive(Clone)]
pub struct SyncContext {
    pub cache: Arc<LocalCache>,
    pub projection: Arc<Projection>,
    pub remote: Arc<dyn RemoteStore>,
    pub effects: Arc<SideEffects>,
    pub events: Arc<EventDispatcher>,
    pub clock: Arc<dyn Clock>,
    pub connectivity: watch::Receiver<bool>,
    pub session: Arc<Session>,
}

impl SyncContext {
    pub fn is_online(&self) -> bool {
        *self.connectivity.borrow()
    }

    pub fn owner(&self) -> SyncResult<String> {
        self.session.owner_id().ok_or(ClientError::NotAuthenticated)
    }

    /// True while the remote store has not confirmed the task's create.
    pub async fn is_unconfirmed(&self, id: &TaskId) -> bool {
        id.is_temporary() || self.cache.pending_tasks().await.iter().any(|p| p.task_id() == id)
    }

    /// True while an update or delete of `id` waits in the queue. Entries that
    /// need resolution do not count; they no longer hold back new writes.
    pub async fn has_queued_changes(&self, id: &TaskId) -> bool {
        self.cache
            .pending_changes()
            .await
            .iter()
            .any(|c| &c.task_id == id && !c.retry.needs_resolution())
    }

    /// Queue the create of a task that is still shown locally.
    ///
    /// The projection is checked under the pending-tasks lock. A delete removes
    /// the task from the projection before it drops queued creates under that
    /// same lock, so a task deleted while its remote create was in flight is
    /// never queued again. Returns whether the entry was queued.
    pub async fn enqueue_task(&self, task: Task) -> bool {
        let id = task.id.clone();
        let entry = PendingTask::new(task, self.clock.now());
        let projection = &self.projection;
        match self
            .cache
            .modify::<PendingTasksCollection, _, _>(|queue| {
                if projection.get(&entry.task.id).is_none() {
                    return None;
                }
                queue.retain(|p| p.task_id() != &entry.task.id);
                queue.push(entry);
                Some(queue.len())
            })
            .await
        {
            Ok(Some(len)) => {
                tracing::info!("PIPELINE: Queued create of {} ({} pending)", id, len);
                true
            }
            Ok(None) => {
                tracing::info!("PIPELINE: {} was deleted locally, not queueing its create", id);
                false
            }
            Err(e) => {
                tracing::error!("PIPELINE: Failed to queue create of {}: {}", id, e);
                false
            }
        }
    }

    pub async fn enqueue_change(&self, change: PendingChange) {
        let id = change.task_id.clone();
        let kind = change.change_type;
        match self
            .cache
            .modify::<PendingChangesCollection, _, _>(|queue| {
                queue.push(change);
                queue.len()
            })
            .await
        {
            Ok(len) => tracing::info!("PIPELINE: Queued {} of {} ({} pending)", kind, id, len),
            Err(e) => tracing::error!("PIPELINE: Failed to queue {} of {}: {}", kind, id, e),
        }
    }

    /// Drop every queue entry that refers to `id`.
    pub async fn drop_queued(&self, id: &TaskId) {
        if let Err(e) = self
            .cache
            .modify::<PendingTasksCollection, _, _>(|queue| queue.retain(|p| p.task_id() != id))
            .await
        {
            tracing::error!("PIPELINE: Failed to drop queued create of {}: {}", id, e);
        }
        if let Err(e) = self
            .cache
            .modify::<PendingChangesCollection, _, _>(|queue| queue.retain(|c| &c.task_id != id))
            .await
        {
            tracing::error!("PIPELINE: Failed to drop queued changes of {}: {}", id, e);
        }
    }

    /// Remove a task from the tasks collection and the projection.
    pub async fn forget_task(&self, id: &TaskId) -> bool {
        self.projection.remove(id);
        self.cache
            .modify::<TasksCollection, _, _>(|tasks| {
                let before = tasks.len();
                tasks.retain(|t| &t.id != id);
                tasks.len() != before
            })
            .await
            .unwrap_or(false)
    }

    /// Replace a temporary id with the id the remote store assigned, in the
    /// tasks collection, queued changes, the projection and reminder handles.
    pub async fn promote_id(&self, temporary: &TaskId, remote: &TaskId) {
        if let Err(e) = self
            .cache
            .modify::<TasksCollection, _, _>(|tasks| {
                if tasks.iter().any(|t| &t.id == temporary) {
                    tasks.retain(|t| &t.id != remote);
                }
                for task in tasks.iter_mut().filter(|t| &t.id == temporary) {
                    task.id = remote.clone();
                }
            })
            .await
        {
            tracing::error!("PIPELINE: Failed to rewrite id {} in tasks: {}", temporary, e);
        }

        if let Err(e) = self
            .cache
            .modify::<PendingChangesCollection, _, _>(|queue| {
                for change in queue.iter_mut().filter(|c| &c.task_id == temporary) {
                    change.task_id = remote.clone();
                }
            })
            .await
        {
            tracing::error!("PIPELINE: Failed to rewrite id {} in queue: {}", temporary, e);
        }

        self.projection.promote(temporary, remote);
        self.effects.rekey(temporary, remote);
        self.events.emit(SyncEvent::TaskIdPromoted {
            temporary: temporary.clone(),
            remote: remote.clone(),
        });
        tracing::info!("PIPELINE: Task {} confirmed as {}", temporary, remote);
    }
}
