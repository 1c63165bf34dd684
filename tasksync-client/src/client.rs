use crate::cache::{LocalCache, TasksCollection};
use crate::clock::{Clock, SystemClock};
use crate::config::{ClientConfig, RetryPolicy};
use crate::context::{Session, SyncContext};
use crate::effects::SideEffects;
use crate::events::{EventDispatcher, SyncEvent};
use crate::monitor::{spawn_monitor, AppLifecycle, SyncTrigger};
use crate::pipeline::TaskPipeline;
use crate::projection::Projection;
use crate::reconciler::{ReconcileReport, Reconciler, UnresolvedEntry};
use crate::remote::RemoteStore;
use crate::storage::{SqliteStorage, Storage};
use crate::websocket::WebSocketRemote;
use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tasksync_core::merge::{count_changed, merge_snapshot};
use tasksync_core::schedule::{CalendarEvent, Notice};
use tasksync_core::stats::{self, TaskStats};
use tasksync_core::views::{self, TaskOrder, View, ViewMode};
use tasksync_core::{
    ClientError, QueueEntryId, Settings, SyncResult, Task, TaskDraft, TaskId, TaskPatch,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Sizes of the two pending queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub pending_tasks: usize,
    pub pending_changes: usize,
    pub needs_resolution: usize,
}

impl QueueStatus {
    pub fn is_empty(&self) -> bool {
        self.pending_tasks == 0 && self.pending_changes == 0
    }
}

pub struct TaskClientBuilder {
    storage: Arc<dyn Storage>,
    remote: Arc<dyn RemoteStore>,
    effects: SideEffects,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    resync_interval: Option<Duration>,
    owner_id: Option<String>,
    online: bool,
    lifecycle: AppLifecycle,
}

impl TaskClientBuilder {
    pub fn new(storage: Arc<dyn Storage>, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            storage,
            remote,
            effects: SideEffects::none(),
            clock: Arc::new(SystemClock),
            policy: RetryPolicy::default(),
            resync_interval: None,
            owner_id: None,
            online: false,
            lifecycle: AppLifecycle::Foreground,
        }
    }

    pub fn effects(mut self, effects: SideEffects) -> Self {
        self.effects = effects;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn resync_interval(mut self, interval: Option<Duration>) -> Self {
        self.resync_interval = interval;
        self
    }

    pub fn owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Initial reachability. Starting online does not trigger a reconcile.
    pub fn online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    pub fn lifecycle(mut self, lifecycle: AppLifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Load the projection from the cache and start the monitor and the
    /// reconcile handler. Must be called inside a tokio runtime.
    pub async fn build(self) -> TaskClient {
        let cache = Arc::new(LocalCache::new(self.storage));
        let tasks = cache.tasks().await;
        tracing::info!("PIPELINE: Loaded {} tasks from local cache", tasks.len());

        let (connectivity_tx, connectivity_rx) = watch::channel(self.online);
        let (lifecycle_tx, lifecycle_rx) = watch::channel(self.lifecycle);
        let events = Arc::new(EventDispatcher::new());

        let ctx = SyncContext {
            cache,
            projection: Arc::new(Projection::new(tasks.clone())),
            remote: self.remote,
            effects: Arc::new(self.effects),
            events: events.clone(),
            clock: self.clock,
            connectivity: connectivity_rx.clone(),
            session: Arc::new(Session::new(self.owner_id)),
        };

        let pipeline = TaskPipeline::new(ctx.clone());
        pipeline.seed_temporary_ids(&tasks);
        let reconciler = Arc::new(Reconciler::new(ctx.clone(), self.policy));

        let (trigger_tx, trigger_rx) = mpsc::channel(16);
        let monitor = spawn_monitor(
            connectivity_rx,
            lifecycle_rx,
            trigger_tx.clone(),
            self.resync_interval,
            events,
        );
        let handler = spawn_reconcile_handler(reconciler.clone(), trigger_rx);

        TaskClient {
            ctx,
            pipeline,
            reconciler,
            connectivity: connectivity_tx,
            lifecycle: lifecycle_tx,
            triggers: trigger_tx,
            background: Mutex::new(vec![monitor, handler]),
        }
    }
}

/// Runs one reconcile cycle per trigger. Triggers that pile up while a cycle
/// runs are folded into the next cycle.
fn spawn_reconcile_handler(
    reconciler: Arc<Reconciler>,
    mut triggers: mpsc::Receiver<SyncTrigger>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(trigger) = triggers.recv().await {
            let mut folded = 0;
            while triggers.try_recv().is_ok() {
                folded += 1;
            }
            tracing::debug!("RECONCILER: Cycle for {:?} ({} folded)", trigger, folded);
            reconciler.reconcile().await;
        }
    })
}

/// The sync engine for one device: local cache, mutation pipeline,
/// reconciler and the background tasks that drive them.
pub struct TaskClient {
    ctx: SyncContext,
    pipeline: TaskPipeline,
    reconciler: Arc<Reconciler>,
    connectivity: watch::Sender<bool>,
    lifecycle: watch::Sender<AppLifecycle>,
    triggers: mpsc::Sender<SyncTrigger>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskClient {
    pub fn builder(storage: Arc<dyn Storage>, remote: Arc<dyn RemoteStore>) -> TaskClientBuilder {
        TaskClientBuilder::new(storage, remote)
    }

    /// SQLite cache plus the WebSocket remote described by `config`.
    pub async fn connect(config: &ClientConfig) -> SyncResult<Self> {
        let owner = config.owner_id.clone().ok_or(ClientError::NotAuthenticated)?;
        let storage = Arc::new(SqliteStorage::new(&config.database_url).await?);
        let remote = Arc::new(WebSocketRemote::new(
            config.server_url.clone(),
            owner.clone(),
            config.request_timeout,
        ));
        if let Err(e) = remote.connect().await {
            tracing::warn!("REMOTE: Starting offline: {}", e);
        }
        let online = remote.is_connected();

        Ok(TaskClientBuilder::new(storage, remote)
            .owner(owner)
            .retry_policy(config.retry.clone())
            .resync_interval(config.resync_interval)
            .online(online)
            .build()
            .await)
    }

    // Session

    pub fn sign_in(&self, owner_id: impl Into<String>) {
        self.ctx.session.sign_in(owner_id);
    }

    pub fn sign_out(&self) {
        self.ctx.session.sign_out();
    }

    pub fn owner_id(&self) -> Option<String> {
        self.ctx.session.owner_id()
    }

    // Mutations

    pub async fn create_task(&self, draft: TaskDraft) -> SyncResult<Task> {
        self.pipeline.create(draft).await
    }

    pub async fn update_task(&self, id: &TaskId, patch: TaskPatch) -> SyncResult<Task> {
        self.pipeline.update(id, patch).await
    }

    pub async fn toggle_status(&self, id: &TaskId) -> SyncResult<Task> {
        self.pipeline.toggle_status(id).await
    }

    pub async fn delete_task(&self, id: &TaskId) -> SyncResult<()> {
        self.pipeline.delete(id).await
    }

    // Sync

    /// Run a reconcile cycle now and wait for its report.
    pub async fn reconcile(&self) -> ReconcileReport {
        self.reconciler.reconcile().await
    }

    /// Ask the background handler for a cycle without waiting for it.
    pub fn request_sync(&self) {
        if self.triggers.try_send(SyncTrigger::Manual).is_err() {
            tracing::debug!("RECONCILER: Trigger queue full, a cycle is already pending");
        }
    }

    pub fn set_online(&self, online: bool) {
        self.connectivity.send_replace(online);
    }

    pub fn set_lifecycle(&self, lifecycle: AppLifecycle) {
        self.lifecycle.send_replace(lifecycle);
    }

    pub fn is_online(&self) -> bool {
        self.ctx.is_online()
    }

    pub async fn queue_status(&self) -> QueueStatus {
        let pending_tasks = self.ctx.cache.pending_tasks().await;
        let pending_changes = self.ctx.cache.pending_changes().await;
        let needs_resolution = pending_tasks
            .iter()
            .filter(|p| p.retry.needs_resolution())
            .count()
            + pending_changes
                .iter()
                .filter(|c| c.retry.needs_resolution())
                .count();
        QueueStatus {
            pending_tasks: pending_tasks.len(),
            pending_changes: pending_changes.len(),
            needs_resolution,
        }
    }

    pub async fn unresolved(&self) -> Vec<UnresolvedEntry> {
        self.reconciler.unresolved().await
    }

    pub async fn retry_unresolved(&self, entry: &QueueEntryId) -> SyncResult<()> {
        self.reconciler.retry_unresolved(entry).await
    }

    pub async fn discard_unresolved(&self, entry: &QueueEntryId) -> SyncResult<()> {
        self.reconciler.discard_unresolved(entry).await
    }

    /// Subscribe to the owner's remote task list and fold every snapshot into
    /// the cache and projection until the stream ends.
    pub async fn start_live_updates(&self) -> SyncResult<()> {
        let owner = self.ctx.owner()?;
        let mut subscription = match self.ctx.remote.subscribe(&owner).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.ctx.events.emit(SyncEvent::SyncError {
                    message: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let ctx = self.ctx.clone();
        let handle = tokio::spawn(async move {
            while let Some(snapshot) = subscription.recv().await {
                apply_snapshot(&ctx, snapshot).await;
            }
            tracing::info!("PIPELINE: Live updates for {} ended", owner);
        });
        self.background.lock().push(handle);
        Ok(())
    }

    // Reads

    /// The in-memory task list, newest first.
    pub fn tasks(&self) -> Vec<Task> {
        self.ctx.projection.snapshot()
    }

    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.ctx.projection.get(id)
    }

    pub fn today(&self) -> NaiveDate {
        self.ctx.clock.local_now().date()
    }

    pub fn view(&self, mode: ViewMode, reference: NaiveDate, order: TaskOrder) -> View {
        views::build_view(&self.ctx.projection.snapshot(), mode, reference, order)
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats::compute(&self.ctx.projection.snapshot(), self.today())
    }

    pub fn overdue(&self) -> Vec<Task> {
        stats::overdue(&self.ctx.projection.snapshot(), self.today())
    }

    // Tags and settings

    pub async fn tags(&self) -> Vec<String> {
        self.ctx.cache.tags().await
    }

    pub async fn add_tag(&self, tag: &str) -> SyncResult<bool> {
        Ok(self.ctx.cache.add_tag(tag).await?)
    }

    pub async fn delete_tag(&self, tag: &str) -> SyncResult<bool> {
        Ok(self.ctx.cache.delete_tag(tag).await?)
    }

    pub async fn settings(&self) -> Settings {
        self.ctx.cache.settings().await
    }

    pub async fn save_settings(&self, settings: &Settings) -> SyncResult<()> {
        Ok(self.ctx.cache.save_settings(settings).await?)
    }

    // Side effects

    /// Calendar events overlapping the hour at the task's due moment. Empty
    /// unless calendar sync is on and the provider is authorized.
    pub async fn calendar_conflicts(&self, id: &TaskId) -> SyncResult<Vec<CalendarEvent>> {
        let task = self
            .ctx
            .projection
            .get(id)
            .ok_or_else(|| ClientError::TaskNotFound(id.clone()))?;
        let settings = self.ctx.cache.settings().await;
        Ok(self.ctx.effects.conflicts_for(&task, &settings).await)
    }

    pub async fn send_daily_summary(&self) -> Notice {
        let notice = Notice::daily_summary(&self.ctx.projection.snapshot(), self.today());
        if self.ctx.cache.settings().await.notifications {
            self.ctx.effects.send_notice(&notice).await;
        }
        notice
    }

    pub fn events(&self) -> Arc<EventDispatcher> {
        self.ctx.events.clone()
    }

    /// Remove every collection from the cache and empty the projection.
    pub async fn clear_local_data(&self) -> SyncResult<()> {
        self.ctx.cache.clear().await?;
        self.ctx.projection.replace(Vec::new());
        Ok(())
    }
}

impl Drop for TaskClient {
    fn drop(&mut self) {
        for handle in self.background.lock().drain(..) {
            handle.abort();
        }
    }
}

async fn apply_snapshot(ctx: &SyncContext, snapshot: Vec<Task>) {
    let pending = ctx.cache.pending_changes().await;
    let merged = ctx
        .cache
        .modify::<TasksCollection, _, _>(|tasks| {
            let merged = merge_snapshot(snapshot.clone(), tasks, &pending);
            let changed = count_changed(tasks, &merged);
            *tasks = merged.clone();
            (merged, changed)
        })
        .await;

    let (merged, changed) = match merged {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!("PIPELINE: Snapshot applied in memory only: {}", e);
            let local = ctx.projection.snapshot();
            let merged = merge_snapshot(snapshot, &local, &pending);
            let changed = count_changed(&local, &merged);
            (merged, changed)
        }
    };

    tracing::info!(
        "PIPELINE: Applied snapshot of {} tasks ({} changed)",
        merged.len(),
        changed
    );
    let task_count = merged.len();
    ctx.projection.replace(merged);
    ctx.events.emit(SyncEvent::SnapshotApplied { task_count });
}
