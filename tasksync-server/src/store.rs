use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use tasksync_core::{ServerError, Task, TaskId, TaskPatch};
use uuid::Uuid;

/// Tasks of every owner, kept in memory.
#[derive(Default)]
pub struct TaskStore {
    tasks: DashMap<String, HashMap<TaskId, Task>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `task` under a freshly assigned id.
    pub fn create(&self, owner_id: &str, task: Task) -> Result<Task, ServerError> {
        if !task.owner_id.is_empty() && task.owner_id != owner_id {
            return Err(ServerError::Unauthorized(
                "Cannot create a task for another owner".to_string(),
            ));
        }
        let mut stored = task;
        stored.id = TaskId::new(Uuid::new_v4().to_string());
        stored.owner_id = owner_id.to_string();

        self.tasks
            .entry(owner_id.to_string())
            .or_default()
            .insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    pub fn update(&self, owner_id: &str, id: &TaskId, patch: &TaskPatch) -> Result<Task, ServerError> {
        let mut owned = self
            .tasks
            .get_mut(owner_id)
            .ok_or_else(|| ServerError::NotFound(id.clone()))?;
        let task = owned
            .get_mut(id)
            .ok_or_else(|| ServerError::NotFound(id.clone()))?;
        patch.apply_to(task, Utc::now());
        Ok(task.clone())
    }

    /// Returns whether a task was removed. Deleting an unknown id is not an error.
    pub fn delete(&self, owner_id: &str, id: &TaskId) -> bool {
        self.tasks
            .get_mut(owner_id)
            .map(|mut owned| owned.remove(id).is_some())
            .unwrap_or(false)
    }

    /// The owner's tasks, newest first.
    pub fn snapshot(&self, owner_id: &str) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .get(owner_id)
            .map(|owned| owned.values().cloned().collect())
            .unwrap_or_default();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    pub fn count(&self, owner_id: &str) -> usize {
        self.tasks.get(owner_id).map(|owned| owned.len()).unwrap_or(0)
    }
}
