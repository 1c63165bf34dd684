use crate::models::Task;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

pub const REMINDER_LEAD_MINUTES: i64 = 15;
pub const DEFAULT_EVENT_MINUTES: i64 = 60;

/// Time of day assumed for reminders and calendar events of untimed tasks.
pub fn default_due_time() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Local due moment used for reminders and calendar events.
pub fn reminder_due(task: &Task) -> NaiveDateTime {
    task.due_date
        .and_time(task.due_time.unwrap_or_else(default_due_time))
}

/// When to remind about `task`, or `None` if the due moment or the reminder
/// moment has already passed.
pub fn reminder_at(task: &Task, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let due = reminder_due(task);
    if due <= now {
        return None;
    }
    let at = due - Duration::minutes(REMINDER_LEAD_MINUTES);
    (at > now).then_some(at)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl CalendarEvent {
    pub fn overlaps(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        start < self.end && end > self.start
    }
}

/// Start and end of the calendar event mirroring `task`.
pub fn event_window(task: &Task) -> (NaiveDateTime, NaiveDateTime) {
    let start = reminder_due(task);
    (start, start + Duration::minutes(DEFAULT_EVENT_MINUTES))
}

pub fn find_conflicts(
    events: &[CalendarEvent],
    start: NaiveDateTime,
    duration: Duration,
) -> Vec<CalendarEvent> {
    let end = start + duration;
    events
        .iter()
        .filter(|event| event.overlaps(start, end))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub body: String,
}

impl Notice {
    pub fn task_completed(task_title: &str) -> Self {
        Self {
            title: "Task Completed!".to_string(),
            body: format!("Great job completing \"{task_title}\"!"),
        }
    }

    pub fn reminder(task_title: &str) -> Self {
        Self {
            title: "Task Reminder".to_string(),
            body: format!("\"{task_title}\" is due in {REMINDER_LEAD_MINUTES} minutes"),
        }
    }

    /// Morning summary of the pending tasks due on `today`.
    pub fn daily_summary(tasks: &[Task], today: NaiveDate) -> Self {
        let count = tasks
            .iter()
            .filter(|t| t.due_date == today && !t.is_completed())
            .count();
        let body = match count {
            0 => "No tasks scheduled for today. Great job staying organized!".to_string(),
            1 => "You have 1 task for today. Stay focused!".to_string(),
            n => format!("You have {n} tasks for today. Stay focused!"),
        };
        Self {
            title: "Good Morning!".to_string(),
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskDraft, TaskId};
    use chrono::Utc;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn task(due_time: Option<NaiveTime>) -> Task {
        let mut draft = TaskDraft::new("Pay rent", NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        draft.due_time = due_time;
        draft.into_task(TaskId::from("t"), "u", Utc::now())
    }

    #[test]
    fn test_reminder_defaults_to_nine() {
        let task = task(None);
        assert_eq!(reminder_at(&task, at(2024, 6, 9, 12, 0)), Some(at(2024, 6, 10, 8, 45)));
    }

    #[test]
    fn test_reminder_skipped_when_too_late() {
        let task = task(NaiveTime::from_hms_opt(14, 0, 0));
        assert_eq!(reminder_at(&task, at(2024, 6, 10, 13, 50)), None);
        assert_eq!(reminder_at(&task, at(2024, 6, 10, 15, 0)), None);
        assert_eq!(reminder_at(&task, at(2024, 6, 10, 13, 0)), Some(at(2024, 6, 10, 13, 45)));
    }

    #[test]
    fn test_conflicts_use_half_open_overlap() {
        let events = vec![
            CalendarEvent {
                id: "1".into(),
                title: "standup".into(),
                start: at(2024, 6, 10, 9, 0),
                end: at(2024, 6, 10, 9, 30),
            },
            CalendarEvent {
                id: "2".into(),
                title: "lunch".into(),
                start: at(2024, 6, 10, 10, 0),
                end: at(2024, 6, 10, 11, 0),
            },
        ];
        let (start, end) = event_window(&task(NaiveTime::from_hms_opt(9, 0, 0)));
        assert_eq!(end - start, Duration::minutes(DEFAULT_EVENT_MINUTES));

        let conflicts = find_conflicts(&events, start, end - start);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].id, "1");
    }

    #[test]
    fn test_daily_summary_counts_pending_today() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        assert!(Notice::daily_summary(&[], today).body.starts_with("No tasks"));
        let tasks = vec![task(None), task(None)];
        assert_eq!(
            Notice::daily_summary(&tasks, today).body,
            "You have 2 tasks for today. Stay focused!"
        );
    }
}
