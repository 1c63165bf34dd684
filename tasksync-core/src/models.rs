use crate::errors::ClientError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Prefix of ids assigned locally before the remote store confirms a create.
pub const TEMPORARY_ID_PREFIX: &str = "local_";

pub const DEFAULT_TAG: &str = "Work";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Builds `local_<millis>`.
    pub fn temporary(millis: i64) -> Self {
        Self(format!("{TEMPORARY_ID_PREFIX}{millis}"))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMPORARY_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn toggled(self) -> Self {
        match self {
            TaskStatus::Pending => TaskStatus::Completed,
            TaskStatus::Completed => TaskStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Repeat {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub tag: String,
    pub priority: Priority,
    pub due_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<Repeat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owner_id: String,
}

impl Task {
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Due moment used for ordering. A task without a due time counts as due
    /// at the start of its due date.
    pub fn due_at(&self) -> NaiveDateTime {
        self.due_date
            .and_time(self.due_time.unwrap_or(NaiveTime::MIN))
    }
}

/// User input for a new task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TaskId>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub tag: String,
    pub priority: Priority,
    pub due_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<Repeat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>, due_date: NaiveDate) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: String::new(),
            tag: DEFAULT_TAG.to_string(),
            priority: Priority::default(),
            due_date,
            due_time: None,
            repeat: None,
            location: None,
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_due_time(mut self, due_time: NaiveTime) -> Self {
        self.due_time = Some(due_time);
        self
    }

    pub fn with_repeat(mut self, repeat: Repeat) -> Self {
        self.repeat = Some(repeat);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.title.trim().is_empty() {
            return Err(ClientError::Validation("title must not be empty".to_string()));
        }
        if self.tag.trim().is_empty() {
            return Err(ClientError::Validation("tag must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn into_task(self, id: TaskId, owner_id: &str, now: DateTime<Utc>) -> Task {
        Task {
            id,
            title: self.title.trim().to_string(),
            description: self.description.trim().to_string(),
            tag: self.tag,
            priority: self.priority,
            due_date: self.due_date,
            due_time: self.due_time,
            repeat: self.repeat,
            location: self.location,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            owner_id: owner_id.to_string(),
        }
    }
}

// Distinguishes an absent field from an explicit `null` for clearable fields.
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// The changed fields of an update. `None` leaves a field untouched; for the
/// optional task fields `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_some"
    )]
    pub due_time: Option<Option<NaiveTime>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_some"
    )]
    pub repeat: Option<Option<Repeat>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_some"
    )]
    pub location: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn completes(&self) -> bool {
        self.status == Some(TaskStatus::Completed)
    }

    pub fn reschedules(&self) -> bool {
        self.due_date.is_some() || self.due_time.is_some()
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if matches!(&self.title, Some(title) if title.trim().is_empty()) {
            return Err(ClientError::Validation("title must not be empty".to_string()));
        }
        if matches!(&self.tag, Some(tag) if tag.trim().is_empty()) {
            return Err(ClientError::Validation("tag must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn apply_to(&self, task: &mut Task, updated_at: DateTime<Utc>) {
        if let Some(title) = &self.title {
            task.title = title.trim().to_string();
        }
        if let Some(description) = &self.description {
            task.description = description.trim().to_string();
        }
        if let Some(tag) = &self.tag {
            task.tag = tag.clone();
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(due_time) = self.due_time {
            task.due_time = due_time;
        }
        if let Some(repeat) = self.repeat {
            task.repeat = repeat;
        }
        if let Some(location) = &self.location {
            task.location = location.clone();
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        task.updated_at = updated_at;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    #[default]
    Queued,
    /// Retry cap reached; the entry waits for the user to retry or discard it.
    NeedsResolution,
}

/// Retry bookkeeping carried by every queue entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryState {
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub state: EntryState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl RetryState {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == EntryState::Queued && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    pub fn needs_resolution(&self) -> bool {
        self.state == EntryState::NeedsResolution
    }

    /// Records a failed attempt. `delay` is the wait before the next attempt,
    /// `None` once the retry budget is spent. Returns true when the entry
    /// moved to `NeedsResolution`.
    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        delay: Option<std::time::Duration>,
        error: impl Into<String>,
    ) -> bool {
        self.attempts += 1;
        self.last_error = Some(error.into());
        match delay.and_then(|d| chrono::Duration::from_std(d).ok()) {
            Some(delay) => {
                self.next_attempt_at = Some(now + delay);
                false
            }
            None => {
                self.next_attempt_at = None;
                self.state = EntryState::NeedsResolution;
                true
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A task whose create has not been confirmed by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTask {
    pub task: Task,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub retry: RetryState,
}

impl PendingTask {
    pub fn new(task: Task, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            task,
            enqueued_at,
            retry: RetryState::default(),
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChangeType {
    Update,
    Delete,
}

/// An update or delete that has not reached the remote store yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<TaskPatch>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub retry: RetryState,
}

impl PendingChange {
    pub fn update(task_id: TaskId, patch: TaskPatch, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            change_type: ChangeType::Update,
            task_id,
            payload: Some(patch),
            timestamp,
            retry: RetryState::default(),
        }
    }

    pub fn delete(task_id: TaskId, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            change_type: ChangeType::Delete,
            task_id,
            payload: None,
            timestamp,
            retry: RetryState::default(),
        }
    }

    pub fn patch(&self) -> Option<&TaskPatch> {
        match self.change_type {
            ChangeType::Update => self.payload.as_ref(),
            ChangeType::Delete => None,
        }
    }
}

/// Identifies a queue entry: a queued create by its task id, a queued change
/// by its entry id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "queue", content = "id", rename_all = "snake_case")]
pub enum QueueEntryId {
    Create(TaskId),
    Change(Uuid),
}

impl fmt::Display for QueueEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueEntryId::Create(id) => write!(f, "create:{id}"),
            QueueEntryId::Change(id) => write!(f, "change:{id}"),
        }
    }
}

pub fn default_tags() -> Vec<String> {
    ["Work", "Study", "Family", "Personal", "Other"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub notifications: bool,
    pub dark_mode: bool,
    pub default_category: String,
    pub default_priority: Priority,
    #[serde(default)]
    pub calendar_sync: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            notifications: true,
            dark_mode: false,
            default_category: DEFAULT_TAG.to_string(),
            default_priority: Priority::Medium,
            calendar_sync: false,
        }
    }
}
