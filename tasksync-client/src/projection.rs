use parking_lot::RwLock;
use tasksync_core::{Task, TaskId, TaskPatch};
use chrono::{DateTime, Utc};

/// In-memory task list the UI renders from.
///
/// Rebuilt from the local cache at start-up and replaced wholesale by live
/// snapshots; mutations apply optimistic changes in between.
#[derive(Default)]
pub struct Projection {
    tasks: RwLock<Vec<Task>>,
}

impl Projection {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks: RwLock::new(tasks),
        }
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.read().clone()
    }

    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.tasks.read().iter().find(|t| &t.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    pub fn replace(&self, tasks: Vec<Task>) {
        *self.tasks.write() = tasks;
    }

    /// Insert at the front, replacing any task with the same id.
    pub fn upsert(&self, task: Task) {
        let mut tasks = self.tasks.write();
        tasks.retain(|t| t.id != task.id);
        tasks.insert(0, task);
    }

    pub fn update(&self, id: &TaskId, patch: &TaskPatch, now: DateTime<Utc>) -> bool {
        let mut tasks = self.tasks.write();
        match tasks.iter_mut().find(|t| &t.id == id) {
            Some(task) => {
                patch.apply_to(task, now);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &TaskId) -> bool {
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|t| &t.id != id);
        tasks.len() != before
    }

    /// Rename `temporary` to `remote` in place. A stale copy already carrying
    /// `remote` is dropped first so ids stay unique.
    pub fn promote(&self, temporary: &TaskId, remote: &TaskId) {
        let mut tasks = self.tasks.write();
        if tasks.iter().any(|t| &t.id == temporary) {
            tasks.retain(|t| &t.id != remote);
        }
        for task in tasks.iter_mut().filter(|t| &t.id == temporary) {
            task.id = remote.clone();
        }
    }
}
