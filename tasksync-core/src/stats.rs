use crate::models::Task;
use chrono::NaiveDate;
use serde::Serialize;

/// Counters for the statistics screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub today_pending: usize,
    pub upcoming_pending: usize,
    pub completed: usize,
    pub total: usize,
}

impl TaskStats {
    pub fn compute(tasks: &[Task], today: NaiveDate) -> Self {
        tasks.iter().fold(Self::default(), |mut stats, task| {
            stats.total += 1;
            if task.is_completed() {
                stats.completed += 1;
            } else if task.due_date == today {
                stats.today_pending += 1;
            } else if task.due_date > today {
                stats.upcoming_pending += 1;
            }
            stats
        })
    }

    pub fn completion_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Pending tasks due before `today`, oldest first.
pub fn overdue(tasks: &[Task], today: NaiveDate) -> Vec<Task> {
    let mut late: Vec<Task> = tasks
        .iter()
        .filter(|task| !task.is_completed() && task.due_date < today)
        .cloned()
        .collect();
    late.sort_by(|a, b| a.due_at().cmp(&b.due_at()));
    late
}
