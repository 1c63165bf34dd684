use crate::models::{ChangeType, PendingChange, Task, TaskId};
use std::collections::HashSet;
use tracing::debug;

/// Folds a remote snapshot together with work that has not reached the remote
/// store yet.
///
/// Remote tasks with a queued delete are dropped, queued update patches are
/// re-applied on top of the remote version, and locally created tasks that
/// still carry a temporary id are appended.
pub fn merge_snapshot(
    remote: Vec<Task>,
    local: &[Task],
    pending_changes: &[PendingChange],
) -> Vec<Task> {
    let deleted: HashSet<&TaskId> = pending_changes
        .iter()
        .filter(|c| c.change_type == ChangeType::Delete)
        .map(|c| &c.task_id)
        .collect();

    let mut merged: Vec<Task> = remote
        .into_iter()
        .filter(|task| !deleted.contains(&task.id))
        .collect();

    for change in pending_changes {
        let Some(patch) = change.patch() else {
            continue;
        };
        if let Some(task) = merged.iter_mut().find(|t| t.id == change.task_id) {
            let updated_at = task.updated_at.max(change.timestamp);
            patch.apply_to(task, updated_at);
        }
    }

    let unconfirmed: Vec<Task> = local
        .iter()
        .filter(|task| task.id.is_temporary())
        .filter(|task| !merged.iter().any(|t| t.id == task.id))
        .cloned()
        .collect();

    debug!(
        "merged snapshot: {} remote, {} replayed changes, {} unconfirmed local",
        merged.len(),
        pending_changes.len(),
        unconfirmed.len()
    );
    merged.extend(unconfirmed);
    merged
}

/// Number of remote tasks that differ from the local copy, used for logging.
pub fn count_changed(before: &[Task], after: &[Task]) -> usize {
    after
        .iter()
        .filter(|task| !before.iter().any(|b| b == *task))
        .count()
}
