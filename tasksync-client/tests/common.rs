use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tasksync_client::{
    CalendarProvider, ManualClock, MemoryStorage, NotificationScheduler, ReminderHandle,
    RemoteStore, RetryPolicy, SideEffects, Subscription, TaskClient,
};
use tasksync_core::schedule::CalendarEvent;
use tasksync_core::{RemoteError, SideEffectError, Task, TaskId, TaskPatch};
use tokio::sync::{mpsc, Notify};

pub const OWNER: &str = "user-1";

/// 2024-06-10 08:00 UTC, a Monday.
#[allow(dead_code)]
pub fn june_10() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 10, 8, 0, 0).unwrap()
}

#[allow(dead_code)]
pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Remote store kept in memory. Ids are `remote-1`, `remote-2`, ... in create
/// order; availability and one-off failures are scripted by the test.
#[derive(Default)]
pub struct FakeRemote {
    tasks: Mutex<Vec<Task>>,
    next_id: AtomicUsize,
    unavailable: AtomicBool,
    scripted_failures: Mutex<VecDeque<RemoteError>>,
    calls: Mutex<Vec<String>>,
    subscribers: Mutex<Vec<mpsc::Sender<Vec<Task>>>>,
    held_create: Mutex<Option<Arc<Notify>>>,
    create_entered: Notify,
}

#[allow(dead_code)]
impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Fail the next call with `error`, regardless of availability.
    pub fn fail_next(&self, error: RemoteError) {
        self.scripted_failures.lock().push_back(error);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.lock().clone()
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        self.tasks.lock().iter().find(|t| t.id.as_str() == id).cloned()
    }

    /// Store a task as if another device had created it.
    pub fn insert(&self, task: Task) {
        self.tasks.lock().push(task);
    }

    /// Make the next `create` wait until the returned gate is notified.
    pub fn hold_next_create(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.held_create.lock() = Some(gate.clone());
        gate
    }

    /// Resolves once a held `create` has been entered.
    pub async fn create_started(&self) {
        self.create_entered.notified().await;
    }

    /// Send the current task list to every subscriber.
    pub async fn push_snapshot(&self) {
        let snapshot = self.tasks();
        let subscribers: Vec<_> = self.subscribers.lock().clone();
        for subscriber in subscribers {
            let _ = subscriber.send(snapshot.clone()).await;
        }
    }

    fn begin(&self, call: String) -> Result<(), RemoteError> {
        self.calls.lock().push(call);
        if let Some(error) = self.scripted_failures.lock().pop_front() {
            return Err(error);
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("network unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn create(&self, task: &Task) -> Result<TaskId, RemoteError> {
        let held = self.held_create.lock().take();
        if let Some(gate) = held {
            self.create_entered.notify_one();
            gate.notified().await;
        }
        self.begin(format!("create:{}", task.id))?;
        let id = TaskId::new(format!(
            "remote-{}",
            self.next_id.fetch_add(1, Ordering::SeqCst) + 1
        ));
        let mut stored = task.clone();
        stored.id = id.clone();
        self.tasks.lock().push(stored);
        Ok(id)
    }

    async fn update(&self, id: &TaskId, patch: &TaskPatch) -> Result<(), RemoteError> {
        self.begin(format!("update:{id}"))?;
        let mut tasks = self.tasks.lock();
        let task = tasks
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| RemoteError::NotFound(id.clone()))?;
        let updated_at = task.updated_at;
        patch.apply_to(task, updated_at);
        Ok(())
    }

    async fn delete(&self, id: &TaskId) -> Result<(), RemoteError> {
        self.begin(format!("delete:{id}"))?;
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|t| &t.id != id);
        if tasks.len() == before {
            return Err(RemoteError::NotFound(id.clone()));
        }
        Ok(())
    }

    async fn subscribe(&self, owner_id: &str) -> Result<Subscription, RemoteError> {
        self.begin(format!("subscribe:{owner_id}"))?;
        let (tx, rx) = mpsc::channel(16);
        let _ = tx.try_send(self.tasks());
        self.subscribers.lock().push(tx);
        Ok(rx)
    }
}

/// Notification scheduler that records what it was asked to do.
#[derive(Default)]
pub struct RecordingNotifier {
    pub scheduled: Mutex<Vec<(TaskId, NaiveDateTime)>>,
    pub cancelled: Mutex<Vec<ReminderHandle>>,
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl NotificationScheduler for RecordingNotifier {
    async fn schedule_reminder(
        &self,
        task: &Task,
        at: NaiveDateTime,
    ) -> Result<Option<ReminderHandle>, SideEffectError> {
        self.scheduled.lock().push((task.id.clone(), at));
        Ok(Some(ReminderHandle(format!("reminder-{}", task.id))))
    }

    async fn cancel(&self, handle: &ReminderHandle) -> Result<(), SideEffectError> {
        self.cancelled.lock().push(handle.clone());
        Ok(())
    }

    async fn send_immediate(&self, title: &str, body: &str) -> Result<(), SideEffectError> {
        self.sent.lock().push((title.to_string(), body.to_string()));
        Ok(())
    }
}

/// Calendar that is always authorized and reports a fixed set of events.
#[derive(Default)]
pub struct FakeCalendar {
    pub events: Mutex<Vec<CalendarEvent>>,
    pub created: Mutex<Vec<(TaskId, NaiveDateTime, NaiveDateTime)>>,
}

#[async_trait]
impl CalendarProvider for FakeCalendar {
    async fn is_authorized(&self) -> bool {
        true
    }

    async fn create_event(
        &self,
        task: &Task,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<String, SideEffectError> {
        self.created.lock().push((task.id.clone(), start, end));
        Ok(format!("event-{}", task.id))
    }

    async fn query_conflicts(
        &self,
        start: NaiveDateTime,
        duration: ChronoDuration,
    ) -> Result<Vec<CalendarEvent>, SideEffectError> {
        Ok(tasksync_core::schedule::find_conflicts(
            &self.events.lock(),
            start,
            duration,
        ))
    }
}

pub struct Harness {
    pub client: TaskClient,
    pub remote: Arc<FakeRemote>,
    pub storage: Arc<MemoryStorage>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub calendar: Arc<FakeCalendar>,
}

/// Signed-in client on 2024-06-10 with no retry waits and escalation after
/// three failures.
#[allow(dead_code)]
pub async fn setup(online: bool) -> Harness {
    setup_with(online, RetryPolicy::immediate(3), Arc::new(MemoryStorage::new())).await
}

#[allow(dead_code)]
pub async fn setup_with(online: bool, policy: RetryPolicy, storage: Arc<MemoryStorage>) -> Harness {
    let remote = Arc::new(FakeRemote::new());
    let clock = Arc::new(ManualClock::new(june_10()));
    let notifier = Arc::new(RecordingNotifier::default());
    let calendar = Arc::new(FakeCalendar::default());

    let client = TaskClient::builder(storage.clone(), remote.clone())
        .owner(OWNER)
        .online(online)
        .clock(clock.clone())
        .retry_policy(policy)
        .effects(SideEffects::new(
            Some(notifier.clone()),
            Some(calendar.clone()),
        ))
        .build()
        .await;

    Harness {
        client,
        remote,
        storage,
        clock,
        notifier,
        calendar,
    }
}

/// Poll `check` until it holds or two seconds pass.
#[allow(dead_code)]
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
