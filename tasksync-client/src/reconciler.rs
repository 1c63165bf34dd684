//! Drains the pending queues against the remote store.
//!
//! A cycle first replays queued creates in FIFO order, then queued updates and
//! deletes in FIFO order. Changes against a task whose create is unconfirmed
//! wait for a later cycle, and once a change for a task fails or is waiting on
//! backoff, later changes for the same task are held back so per-task order is
//! preserved. Cycles are single-flight.

use crate::cache::{PendingChangesCollection, PendingTasksCollection};
use crate::config::RetryPolicy;
use crate::context::SyncContext;
use crate::events::SyncEvent;
use serde::Serialize;
use std::collections::HashSet;
use tasksync_core::{
    ChangeType, ClientError, PendingChange, QueueEntryId, RemoteError, SyncResult, TaskId,
};
use tokio::sync::Mutex;

/// Outcome counters of one reconcile cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub tasks_confirmed: usize,
    pub changes_replayed: usize,
    /// Attempts that failed and were rescheduled.
    pub failed: usize,
    /// Entries not attempted this cycle (backoff, unconfirmed create, held).
    pub deferred: usize,
    /// Entries that moved to `NeedsResolution` during this cycle.
    pub needs_resolution: usize,
}

impl ReconcileReport {
    pub fn attempted(&self) -> usize {
        self.tasks_confirmed + self.changes_replayed + self.failed + self.needs_resolution
    }
}

/// A queue entry that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedEntry {
    pub id: QueueEntryId,
    pub task_id: TaskId,
    /// `None` for a queued create.
    pub change_type: Option<ChangeType>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

pub struct Reconciler {
    ctx: SyncContext,
    policy: RetryPolicy,
    gate: Mutex<()>,
}

impl Reconciler {
    pub fn new(ctx: SyncContext, policy: RetryPolicy) -> Self {
        Self {
            ctx,
            policy,
            gate: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one cycle. A caller arriving while a cycle is in progress waits for
    /// it and then runs against what is left.
    pub async fn reconcile(&self) -> ReconcileReport {
        let _flight = self.gate.lock().await;
        let mut report = ReconcileReport::default();

        if !self.ctx.is_online() {
            tracing::debug!("RECONCILER: Offline, skipping cycle");
            return report;
        }

        self.ctx.events.emit(SyncEvent::SyncStarted);
        self.drain_tasks(&mut report).await;
        self.drain_changes(&mut report).await;

        if report.attempted() > 0 || report.deferred > 0 {
            tracing::info!(
                "RECONCILER: Cycle done - {} confirmed, {} replayed, {} failed, {} deferred, {} need resolution",
                report.tasks_confirmed,
                report.changes_replayed,
                report.failed,
                report.deferred,
                report.needs_resolution
            );
        }
        self.ctx.events.emit(SyncEvent::SyncCompleted {
            tasks_confirmed: report.tasks_confirmed,
            changes_replayed: report.changes_replayed,
            failed: report.failed + report.needs_resolution,
        });
        report
    }

    async fn drain_tasks(&self, report: &mut ReconcileReport) {
        let mut queue = self.ctx.cache.pending_tasks().await;
        queue.sort_by_key(|entry| entry.enqueued_at);
        let now = self.ctx.clock.now();

        for entry in queue {
            let local_id = entry.task.id.clone();
            if entry.retry.needs_resolution() {
                continue;
            }
            if !entry.retry.is_due(now) {
                report.deferred += 1;
                continue;
            }
            // Deleted locally since the queue was read.
            if !self.still_queued_task(&local_id).await {
                continue;
            }

            match self.ctx.remote.create(&entry.task).await {
                Ok(remote_id) => {
                    let removed = self
                        .ctx
                        .cache
                        .modify::<PendingTasksCollection, _, _>(|queue| {
                            let before = queue.len();
                            queue.retain(|p| p.task_id() != &local_id);
                            queue.len() != before
                        })
                        .await
                        .unwrap_or(true);

                    if removed {
                        self.ctx.promote_id(&local_id, &remote_id).await;
                    } else {
                        self.remove_orphan(&local_id, &remote_id).await;
                    }
                    report.tasks_confirmed += 1;
                }
                Err(e) => {
                    tracing::warn!("RECONCILER: Create of {} failed: {}", local_id, e);
                    self.record_failure(QueueEntryId::Create(local_id.clone()), &local_id, &e, report)
                        .await;
                }
            }
        }
    }

    async fn still_queued_task(&self, id: &TaskId) -> bool {
        self.ctx
            .cache
            .pending_tasks()
            .await
            .iter()
            .any(|p| p.task_id() == id)
    }

    /// The task was deleted locally while its create was in flight.
    async fn remove_orphan(&self, local_id: &TaskId, remote_id: &TaskId) {
        tracing::info!(
            "RECONCILER: {} was deleted while its create was in flight, deleting {}",
            local_id,
            remote_id
        );
        match self.ctx.remote.delete(remote_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                tracing::warn!("RECONCILER: Delete of orphan {} failed, queueing: {}", remote_id, e);
                self.ctx
                    .enqueue_change(PendingChange::delete(remote_id.clone(), self.ctx.clock.now()))
                    .await;
            }
        }
    }

    async fn drain_changes(&self, report: &mut ReconcileReport) {
        let mut queue = self.ctx.cache.pending_changes().await;
        queue.sort_by_key(|change| change.timestamp);
        let unconfirmed: HashSet<TaskId> = self
            .ctx
            .cache
            .pending_tasks()
            .await
            .into_iter()
            .map(|p| p.task.id)
            .collect();
        let now = self.ctx.clock.now();
        let mut held: HashSet<TaskId> = HashSet::new();

        for change in queue {
            let task_id = change.task_id.clone();
            if task_id.is_temporary() || unconfirmed.contains(&task_id) || held.contains(&task_id) {
                report.deferred += 1;
                continue;
            }
            if change.retry.needs_resolution() {
                held.insert(task_id);
                continue;
            }
            if !change.retry.is_due(now) {
                held.insert(task_id);
                report.deferred += 1;
                continue;
            }

            match self.replay(&change).await {
                Ok(()) => {
                    if let Err(e) = self
                        .ctx
                        .cache
                        .modify::<PendingChangesCollection, _, _>(|queue| {
                            queue.retain(|c| c.id != change.id)
                        })
                        .await
                    {
                        tracing::error!("RECONCILER: Failed to drop replayed change {}: {}", change.id, e);
                    }
                    report.changes_replayed += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "RECONCILER: {} of {} failed: {}",
                        change.change_type,
                        task_id,
                        e
                    );
                    held.insert(task_id.clone());
                    self.record_failure(QueueEntryId::Change(change.id), &task_id, &e, report)
                        .await;
                }
            }
        }
    }

    async fn replay(&self, change: &PendingChange) -> Result<(), RemoteError> {
        match change.change_type {
            ChangeType::Update => match change.patch() {
                Some(patch) => self.ctx.remote.update(&change.task_id, patch).await,
                None => Ok(()),
            },
            ChangeType::Delete => match self.ctx.remote.delete(&change.task_id).await {
                Err(e) if e.is_not_found() => Ok(()),
                result => result,
            },
        }
    }

    async fn record_failure(
        &self,
        entry: QueueEntryId,
        task_id: &TaskId,
        error: &RemoteError,
        report: &mut ReconcileReport,
    ) {
        let now = self.ctx.clock.now();
        let message = error.to_string();
        let policy = &self.policy;

        let outcome = match &entry {
            QueueEntryId::Create(id) => {
                self.ctx
                    .cache
                    .modify::<PendingTasksCollection, _, _>(|queue| {
                        queue.iter_mut().find(|p| p.task_id() == id).map(|p| {
                            let delay = policy.delay_after(p.retry.attempts + 1);
                            p.retry.record_failure(now, delay, message.clone())
                        })
                    })
                    .await
            }
            QueueEntryId::Change(id) => {
                self.ctx
                    .cache
                    .modify::<PendingChangesCollection, _, _>(|queue| {
                        queue.iter_mut().find(|c| &c.id == id).map(|c| {
                            let delay = policy.delay_after(c.retry.attempts + 1);
                            c.retry.record_failure(now, delay, message.clone())
                        })
                    })
                    .await
            }
        };

        match outcome {
            Ok(Some(true)) => {
                tracing::error!(
                    "RECONCILER: {} for {} gave up after {} attempts",
                    entry,
                    task_id,
                    policy.max_attempts
                );
                report.needs_resolution += 1;
                self.ctx.events.emit(SyncEvent::NeedsResolution {
                    entry,
                    task_id: task_id.clone(),
                    last_error: message,
                });
            }
            Ok(Some(false)) => report.failed += 1,
            Ok(None) => {}
            Err(e) => {
                report.failed += 1;
                tracing::error!("RECONCILER: Failed to record attempt of {}: {}", entry, e);
            }
        }
    }

    /// Entries that reached `NeedsResolution`, creates first.
    pub async fn unresolved(&self) -> Vec<UnresolvedEntry> {
        let creates = self
            .ctx
            .cache
            .pending_tasks()
            .await
            .into_iter()
            .filter(|p| p.retry.needs_resolution())
            .map(|p| UnresolvedEntry {
                id: QueueEntryId::Create(p.task.id.clone()),
                task_id: p.task.id,
                change_type: None,
                attempts: p.retry.attempts,
                last_error: p.retry.last_error,
            });
        let changes = self
            .ctx
            .cache
            .pending_changes()
            .await
            .into_iter()
            .filter(|c| c.retry.needs_resolution())
            .map(|c| UnresolvedEntry {
                id: QueueEntryId::Change(c.id),
                task_id: c.task_id,
                change_type: Some(c.change_type),
                attempts: c.retry.attempts,
                last_error: c.retry.last_error,
            });
        creates.chain(changes).collect()
    }

    /// Put an unresolved entry back in the queue with fresh retry bookkeeping.
    pub async fn retry_unresolved(&self, entry: &QueueEntryId) -> SyncResult<()> {
        let found = match entry {
            QueueEntryId::Create(id) => {
                self.ctx
                    .cache
                    .modify::<PendingTasksCollection, _, _>(|queue| {
                        queue
                            .iter_mut()
                            .find(|p| p.task_id() == id && p.retry.needs_resolution())
                            .map(|p| p.retry.reset())
                            .is_some()
                    })
                    .await?
            }
            QueueEntryId::Change(id) => {
                self.ctx
                    .cache
                    .modify::<PendingChangesCollection, _, _>(|queue| {
                        queue
                            .iter_mut()
                            .find(|c| &c.id == id && c.retry.needs_resolution())
                            .map(|c| c.retry.reset())
                            .is_some()
                    })
                    .await?
            }
        };

        if !found {
            return Err(ClientError::InvalidState(format!(
                "no unresolved queue entry {entry}"
            )));
        }
        tracing::info!("RECONCILER: Requeued {}", entry);
        Ok(())
    }

    /// Drop an unresolved entry. Discarding a create also removes the local
    /// task and every change queued against it.
    pub async fn discard_unresolved(&self, entry: &QueueEntryId) -> SyncResult<()> {
        match entry {
            QueueEntryId::Create(id) => {
                let found = self
                    .ctx
                    .cache
                    .modify::<PendingTasksCollection, _, _>(|queue| {
                        let before = queue.len();
                        queue.retain(|p| !(p.task_id() == id && p.retry.needs_resolution()));
                        queue.len() != before
                    })
                    .await?;
                if !found {
                    return Err(ClientError::InvalidState(format!(
                        "no unresolved queue entry {entry}"
                    )));
                }
                self.ctx.drop_queued(id).await;
                self.ctx.forget_task(id).await;
                self.ctx.effects.task_deleted(id).await;
                self.ctx.events.emit(SyncEvent::TaskDeleted {
                    id: id.clone(),
                    queued: false,
                });
            }
            QueueEntryId::Change(id) => {
                let found = self
                    .ctx
                    .cache
                    .modify::<PendingChangesCollection, _, _>(|queue| {
                        let before = queue.len();
                        queue.retain(|c| !(&c.id == id && c.retry.needs_resolution()));
                        queue.len() != before
                    })
                    .await?;
                if !found {
                    return Err(ClientError::InvalidState(format!(
                        "no unresolved queue entry {entry}"
                    )));
                }
            }
        }
        tracing::info!("RECONCILER: Discarded {}", entry);
        Ok(())
    }
}
