//! Notification and calendar side effects of task mutations.
//!
//! Both integrations live outside the engine and are reached through traits.
//! Their failures are logged and never undo the mutation that triggered them.

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tasksync_core::schedule::{self, CalendarEvent, Notice, DEFAULT_EVENT_MINUTES};
use tasksync_core::{Settings, SideEffectError, Task, TaskId};

/// Opaque id of a scheduled reminder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReminderHandle(pub String);

#[async_trait]
pub trait NotificationScheduler: Send + Sync {
    async fn schedule_reminder(
        &self,
        task: &Task,
        at: NaiveDateTime,
    ) -> Result<Option<ReminderHandle>, SideEffectError>;

    async fn cancel(&self, handle: &ReminderHandle) -> Result<(), SideEffectError>;

    async fn send_immediate(&self, title: &str, body: &str) -> Result<(), SideEffectError>;
}

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn is_authorized(&self) -> bool;

    /// Create an event mirroring `task` and return its id.
    async fn create_event(
        &self,
        task: &Task,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<String, SideEffectError>;

    async fn query_conflicts(
        &self,
        start: NaiveDateTime,
        duration: Duration,
    ) -> Result<Vec<CalendarEvent>, SideEffectError>;
}

/// Runs side effects for the pipeline and tracks reminder handles by task id.
#[derive(Default)]
pub struct SideEffects {
    notifier: Option<Arc<dyn NotificationScheduler>>,
    calendar: Option<Arc<dyn CalendarProvider>>,
    reminders: Mutex<HashMap<TaskId, ReminderHandle>>,
}

impl SideEffects {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(
        notifier: Option<Arc<dyn NotificationScheduler>>,
        calendar: Option<Arc<dyn CalendarProvider>>,
    ) -> Self {
        Self {
            notifier,
            calendar,
            reminders: Mutex::new(HashMap::new()),
        }
    }

    pub fn reminder_for(&self, id: &TaskId) -> Option<ReminderHandle> {
        self.reminders.lock().get(id).cloned()
    }

    async fn calendar_enabled(&self, settings: &Settings) -> Option<&Arc<dyn CalendarProvider>> {
        let calendar = self.calendar.as_ref()?;
        if settings.calendar_sync && calendar.is_authorized().await {
            Some(calendar)
        } else {
            None
        }
    }

    async fn schedule(&self, task: &Task, settings: &Settings, now: NaiveDateTime) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if !settings.notifications {
            return;
        }
        let Some(at) = schedule::reminder_at(task, now) else {
            tracing::debug!("PIPELINE: No reminder for {}, due time already passed", task.id);
            return;
        };
        match notifier.schedule_reminder(task, at).await {
            Ok(Some(handle)) => {
                self.reminders.lock().insert(task.id.clone(), handle);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("PIPELINE: Failed to schedule reminder for {}: {}", task.id, e),
        }
    }

    pub async fn task_created(&self, task: &Task, settings: &Settings, now: NaiveDateTime) {
        self.schedule(task, settings, now).await;

        if let Some(calendar) = self.calendar_enabled(settings).await {
            let (start, end) = schedule::event_window(task);
            match calendar.create_event(task, start, end).await {
                Ok(event_id) => {
                    tracing::info!("PIPELINE: Calendar event {} created for {}", event_id, task.id)
                }
                Err(e) => tracing::warn!("PIPELINE: Failed to create calendar event: {}", e),
            }
        }
    }

    /// Replace the reminder of a task whose due moment changed.
    pub async fn task_rescheduled(&self, task: &Task, settings: &Settings, now: NaiveDateTime) {
        self.cancel(&task.id).await;
        self.schedule(task, settings, now).await;
    }

    pub async fn task_completed(&self, task: &Task) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let notice = Notice::task_completed(&task.title);
        if let Err(e) = notifier.send_immediate(&notice.title, &notice.body).await {
            tracing::warn!("PIPELINE: Failed to send completion notice: {}", e);
        }
    }

    pub async fn task_deleted(&self, id: &TaskId) {
        self.cancel(id).await;
    }

    async fn cancel(&self, id: &TaskId) {
        let handle = self.reminders.lock().remove(id);
        if let (Some(handle), Some(notifier)) = (handle, &self.notifier) {
            if let Err(e) = notifier.cancel(&handle).await {
                tracing::warn!("PIPELINE: Failed to cancel reminder for {}: {}", id, e);
            }
        }
    }

    /// Move a reminder handle from a temporary id to the remote id.
    pub fn rekey(&self, temporary: &TaskId, remote: &TaskId) {
        let mut reminders = self.reminders.lock();
        if let Some(handle) = reminders.remove(temporary) {
            reminders.insert(remote.clone(), handle);
        }
    }

    /// Calendar events overlapping the hour starting at the task's due moment.
    pub async fn conflicts_for(&self, task: &Task, settings: &Settings) -> Vec<CalendarEvent> {
        let Some(calendar) = self.calendar_enabled(settings).await else {
            return Vec::new();
        };
        let (start, _) = schedule::event_window(task);
        calendar
            .query_conflicts(start, Duration::minutes(DEFAULT_EVENT_MINUTES))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("PIPELINE: Failed to query calendar conflicts: {}", e);
                Vec::new()
            })
    }

    pub async fn send_notice(&self, notice: &Notice) {
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.send_immediate(&notice.title, &notice.body).await {
                tracing::warn!("PIPELINE: Failed to send notice: {}", e);
            }
        }
    }
}
