//! Task mutations.
//!
//! Every mutation is applied optimistically to the projection and the local
//! cache first. The remote write is attempted only when the device is online,
//! the task is known to the remote store and nothing older for the task is
//! still queued; otherwise, or when the remote write fails, a queue entry is
//! recorded for the reconciler.

use crate::cache::{PendingChangesCollection, TasksCollection};
use crate::context::SyncContext;
use crate::events::SyncEvent;
use std::sync::atomic::{AtomicI64, Ordering};
use tasksync_core::{
    ChangeType, ClientError, PendingChange, SyncResult, Task, TaskDraft, TaskId, TaskPatch,
    TaskStatus, TEMPORARY_ID_PREFIX,
};

pub struct TaskPipeline {
    ctx: SyncContext,
    last_temp_millis: AtomicI64,
}

impl TaskPipeline {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            last_temp_millis: AtomicI64::new(0),
        }
    }

    /// Make sure new temporary ids sort after any already present in `tasks`.
    pub fn seed_temporary_ids(&self, tasks: &[Task]) {
        let highest = tasks
            .iter()
            .filter_map(|t| t.id.as_str().strip_prefix(TEMPORARY_ID_PREFIX))
            .filter_map(|millis| millis.parse::<i64>().ok())
            .max()
            .unwrap_or(0);
        self.last_temp_millis.fetch_max(highest, Ordering::SeqCst);
    }

    /// `local_<millis>` with millis strictly increasing across calls.
    fn next_temporary_id(&self) -> TaskId {
        let now = self.ctx.clock.now().timestamp_millis();
        let mut prev = self.last_temp_millis.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match self.last_temp_millis.compare_exchange(
                prev,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return TaskId::temporary(next),
                Err(actual) => prev = actual,
            }
        }
    }

    pub async fn create(&self, draft: TaskDraft) -> SyncResult<Task> {
        let owner = self.ctx.owner()?;
        draft.validate()?;

        let settings = self.ctx.cache.settings().await;
        let now = self.ctx.clock.now();
        let id = match &draft.id {
            Some(id) => id.clone(),
            None => self.next_temporary_id(),
        };
        let mut task = draft.into_task(id, &owner, now);

        self.ctx.projection.upsert(task.clone());
        let stored = task.clone();
        if let Err(e) = self
            .ctx
            .cache
            .modify::<TasksCollection, _, _>(|tasks| {
                tasks.retain(|t| t.id != stored.id);
                tasks.insert(0, stored);
            })
            .await
        {
            tracing::warn!("PIPELINE: Task {} kept in memory only: {}", task.id, e);
        }

        let queued = if !self.ctx.is_online() {
            tracing::info!("PIPELINE: Offline, queueing create of {}", task.id);
            self.ctx.enqueue_task(task.clone()).await;
            true
        } else {
            match self.ctx.remote.create(&task).await {
                Ok(remote_id) => {
                    let kept = self.confirm_create(&task.id, &remote_id).await;
                    task.id = remote_id;
                    if !kept {
                        return Ok(task);
                    }
                    false
                }
                Err(e) => {
                    tracing::warn!("PIPELINE: Remote create of {} failed, queueing: {}", task.id, e);
                    if !self.ctx.enqueue_task(task.clone()).await
                        && self.ctx.projection.get(&task.id).is_none()
                    {
                        // Deleted while the create was in flight.
                        return Ok(task);
                    }
                    true
                }
            }
        };

        self.ctx
            .effects
            .task_created(&task, &settings, self.ctx.clock.local_now())
            .await;
        self.ctx.events.emit(SyncEvent::TaskCreated {
            id: task.id.clone(),
            title: task.title.clone(),
            queued,
        });
        Ok(task)
    }

    /// Returns false when the task was deleted locally before the remote
    /// store confirmed it.
    async fn confirm_create(&self, local_id: &TaskId, remote_id: &TaskId) -> bool {
        if local_id == remote_id {
            return true;
        }
        let still_present = self.ctx.cache.tasks().await.iter().any(|t| &t.id == local_id)
            || self.ctx.projection.get(local_id).is_some();
        if still_present {
            self.ctx.promote_id(local_id, remote_id).await;
            return true;
        }

        // Deleted locally while the create was in flight.
        tracing::info!(
            "PIPELINE: {} was deleted before {} was confirmed, removing it remotely",
            local_id,
            remote_id
        );
        match self.ctx.remote.delete(remote_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(_) => {
                self.ctx
                    .enqueue_change(PendingChange::delete(remote_id.clone(), self.ctx.clock.now()))
                    .await
            }
        }
        false
    }

    /// A direct remote write is only safe when nothing older for the task is
    /// still waiting to be replayed.
    async fn must_queue(&self, id: &TaskId) -> bool {
        !self.ctx.is_online()
            || self.ctx.is_unconfirmed(id).await
            || self.ctx.has_queued_changes(id).await
    }

    pub async fn update(&self, id: &TaskId, patch: TaskPatch) -> SyncResult<Task> {
        self.ctx.owner()?;
        patch.validate()?;
        if patch.is_empty() {
            return self.find(id).await;
        }

        let now = self.ctx.clock.now();
        let applied = self
            .ctx
            .cache
            .modify::<TasksCollection, _, _>(|tasks| {
                tasks.iter_mut().find(|t| &t.id == id).map(|task| {
                    let previous = task.status;
                    patch.apply_to(task, now);
                    (previous, task.clone())
                })
            })
            .await;

        let (previous, task) = match applied {
            Ok(Some(applied)) => applied,
            Ok(None) => return Err(ClientError::TaskNotFound(id.clone())),
            Err(e) => {
                tracing::warn!("PIPELINE: Update of {} kept in memory only: {}", id, e);
                let mut task = self
                    .ctx
                    .projection
                    .get(id)
                    .ok_or_else(|| ClientError::TaskNotFound(id.clone()))?;
                let previous = task.status;
                patch.apply_to(&mut task, now);
                (previous, task)
            }
        };

        if !self.ctx.projection.update(id, &patch, now) {
            self.ctx.projection.upsert(task.clone());
        }

        let queued = if self.must_queue(id).await {
            self.ctx
                .enqueue_change(PendingChange::update(id.clone(), patch.clone(), now))
                .await;
            true
        } else {
            match self.ctx.remote.update(id, &patch).await {
                Ok(()) => false,
                Err(e) => {
                    tracing::warn!("PIPELINE: Remote update of {} failed, queueing: {}", id, e);
                    self.ctx
                        .enqueue_change(PendingChange::update(id.clone(), patch.clone(), now))
                        .await;
                    true
                }
            }
        };

        if patch.completes() && previous != TaskStatus::Completed {
            self.ctx.effects.task_completed(&task).await;
        } else if patch.reschedules() && !task.is_completed() {
            let settings = self.ctx.cache.settings().await;
            self.ctx
                .effects
                .task_rescheduled(&task, &settings, self.ctx.clock.local_now())
                .await;
        }

        self.ctx.events.emit(SyncEvent::TaskUpdated {
            id: task.id.clone(),
            status: task.status,
            queued,
        });
        Ok(task)
    }

    async fn find(&self, id: &TaskId) -> SyncResult<Task> {
        match self.ctx.cache.tasks().await.into_iter().find(|t| &t.id == id) {
            Some(task) => Ok(task),
            None => self
                .ctx
                .projection
                .get(id)
                .ok_or_else(|| ClientError::TaskNotFound(id.clone())),
        }
    }

    /// Flip a task between pending and completed.
    pub async fn toggle_status(&self, id: &TaskId) -> SyncResult<Task> {
        let current = self.find(id).await?;
        self.update(id, TaskPatch::status(current.status.toggled()))
            .await
    }

    /// Optimistic delete. Not rolled back if the remote delete later fails.
    pub async fn delete(&self, id: &TaskId) -> SyncResult<()> {
        self.ctx.owner()?;

        let removed = self
            .ctx
            .cache
            .modify::<TasksCollection, _, _>(|tasks| {
                let before = tasks.len();
                tasks.retain(|t| &t.id != id);
                tasks.len() != before
            })
            .await;

        match removed {
            Ok(true) => {}
            Ok(false) => return Err(ClientError::TaskNotFound(id.clone())),
            Err(e) => {
                if self.ctx.projection.get(id).is_none() {
                    return Err(ClientError::TaskNotFound(id.clone()));
                }
                tracing::warn!("PIPELINE: Delete of {} applied in memory only: {}", id, e);
            }
        }
        self.ctx.projection.remove(id);
        self.ctx.effects.task_deleted(id).await;

        let queued = if self.ctx.is_unconfirmed(id).await {
            // The remote never saw this task.
            self.ctx.drop_queued(id).await;
            tracing::info!("PIPELINE: Dropped queued work of unconfirmed task {}", id);
            false
        } else if self.must_queue(id).await {
            self.queue_delete(id).await;
            true
        } else {
            match self.ctx.remote.delete(id).await {
                Ok(()) => {
                    self.prune_updates(id).await;
                    false
                }
                Err(e) if e.is_not_found() => {
                    self.prune_updates(id).await;
                    false
                }
                Err(e) => {
                    tracing::warn!("PIPELINE: Remote delete of {} failed, queueing: {}", id, e);
                    self.queue_delete(id).await;
                    true
                }
            }
        };

        self.ctx.events.emit(SyncEvent::TaskDeleted {
            id: id.clone(),
            queued,
        });
        Ok(())
    }

    /// Queued updates of a deleted task, unresolved ones included, are moot.
    async fn prune_updates(&self, id: &TaskId) {
        if let Err(e) = self
            .ctx
            .cache
            .modify::<PendingChangesCollection, _, _>(|queue| {
                queue.retain(|c| !(&c.task_id == id && c.change_type == ChangeType::Update))
            })
            .await
        {
            tracing::warn!("PIPELINE: Failed to prune queued updates of {}: {}", id, e);
        }
    }

    /// Queue a delete, superseding queued updates of the same task.
    async fn queue_delete(&self, id: &TaskId) {
        self.prune_updates(id).await;
        self.ctx
            .enqueue_change(PendingChange::delete(id.clone(), self.ctx.clock.now()))
            .await;
    }
}
