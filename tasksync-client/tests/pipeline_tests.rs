mod common;

use chrono::{NaiveTime, TimeZone, Utc};
use common::{date, setup, OWNER};
use std::sync::Arc;
use tasksync_client::{LocalCache, SyncEvent};
use tasksync_core::{
    ChangeType, ClientError, RemoteError, TaskDraft, TaskId, TaskPatch, TaskStatus,
};

#[tokio::test]
async fn test_offline_create_gets_temporary_id_and_queues() {
    let h = setup(false).await;

    let task = h
        .client
        .create_task(TaskDraft::new("Pay rent", date(2024, 6, 10)))
        .await
        .unwrap();

    assert!(task.id.is_temporary());
    assert_eq!(task.owner_id, OWNER);
    assert!(h.remote.calls().is_empty());

    let cache = LocalCache::new(h.storage.clone());
    let pending = cache.pending_tasks().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].task_id(), &task.id);
    assert_eq!(cache.tasks().await[0].id, task.id);
    assert_eq!(h.client.tasks().len(), 1);
}

#[tokio::test]
async fn test_online_create_uses_remote_id() {
    let h = setup(true).await;

    let task = h
        .client
        .create_task(TaskDraft::new("Call dentist", date(2024, 6, 11)))
        .await
        .unwrap();

    assert_eq!(task.id, TaskId::from("remote-1"));
    assert!(h.client.queue_status().await.is_empty());

    let cache = LocalCache::new(h.storage.clone());
    let stored = cache.tasks().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, task.id);
    assert!(h.client.task(&task.id).is_some());
    assert_eq!(h.remote.task("remote-1").unwrap().title, "Call dentist");
}

#[tokio::test]
async fn test_failed_remote_create_keeps_temporary_id() {
    let h = setup(true).await;
    h.remote.set_available(false);

    let task = h
        .client
        .create_task(TaskDraft::new("Water plants", date(2024, 6, 12)))
        .await
        .unwrap();

    assert!(task.id.is_temporary());
    let status = h.client.queue_status().await;
    assert_eq!(status.pending_tasks, 1);
    assert_eq!(h.remote.calls(), vec![format!("create:{}", task.id)]);
}

#[tokio::test]
async fn test_create_rejects_without_session_or_title() {
    let h = setup(true).await;

    let result = h
        .client
        .create_task(TaskDraft::new("   ", date(2024, 6, 10)))
        .await;
    assert!(matches!(result, Err(ClientError::Validation(_))));

    h.client.sign_out();
    let result = h
        .client
        .create_task(TaskDraft::new("Pay rent", date(2024, 6, 10)))
        .await;
    assert!(matches!(result, Err(ClientError::NotAuthenticated)));

    assert!(h.client.tasks().is_empty());
    assert!(h.remote.calls().is_empty());
    assert!(h.storage.is_empty());
}

#[tokio::test]
async fn test_temporary_ids_are_unique_within_a_millisecond() {
    let h = setup(false).await;

    let first = h
        .client
        .create_task(TaskDraft::new("One", date(2024, 6, 10)))
        .await
        .unwrap();
    let second = h
        .client
        .create_task(TaskDraft::new("Two", date(2024, 6, 10)))
        .await
        .unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(h.client.queue_status().await.pending_tasks, 2);
}

#[tokio::test]
async fn test_update_unknown_task_is_not_found() {
    let h = setup(true).await;

    let result = h
        .client
        .update_task(&TaskId::from("missing"), TaskPatch::title("New"))
        .await;
    assert!(matches!(result, Err(ClientError::TaskNotFound(_))));

    let result = h.client.delete_task(&TaskId::from("missing")).await;
    assert!(matches!(result, Err(ClientError::TaskNotFound(_))));
}

#[tokio::test]
async fn test_update_rejects_empty_title() {
    let h = setup(true).await;
    let task = h
        .client
        .create_task(TaskDraft::new("Read book", date(2024, 6, 10)))
        .await
        .unwrap();

    let result = h.client.update_task(&task.id, TaskPatch::title("")).await;
    assert!(matches!(result, Err(ClientError::Validation(_))));
    assert_eq!(h.client.task(&task.id).unwrap().title, "Read book");
}

#[tokio::test]
async fn test_completing_sends_notice_once() {
    let h = setup(true).await;
    let task = h
        .client
        .create_task(TaskDraft::new("Gym", date(2024, 6, 10)))
        .await
        .unwrap();

    let done = h.client.toggle_status(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(
        h.remote.task("remote-1").unwrap().status,
        TaskStatus::Completed
    );

    // Completing an already completed task is not a new completion.
    h.client
        .update_task(&task.id, TaskPatch::status(TaskStatus::Completed))
        .await
        .unwrap();

    let sent = h.notifier.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "Task Completed!");
}

#[tokio::test]
async fn test_reminder_follows_task_lifecycle() {
    let h = setup(false).await;
    let task = h
        .client
        .create_task(
            TaskDraft::new("Standup", date(2024, 6, 10))
                .with_due_time(NaiveTime::from_hms_opt(10, 0, 0).unwrap()),
        )
        .await
        .unwrap();

    let scheduled = h.notifier.scheduled.lock().clone();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(
        scheduled[0].1,
        date(2024, 6, 10).and_hms_opt(9, 45, 0).unwrap()
    );

    h.client.delete_task(&task.id).await.unwrap();
    let cancelled = h.notifier.cancelled.lock().clone();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].0, format!("reminder-{}", task.id));
}

#[tokio::test]
async fn test_no_reminder_when_due_time_passed() {
    let h = setup(false).await;
    h.clock.set(Utc.with_ymd_and_hms(2024, 6, 10, 18, 0, 0).unwrap());

    h.client
        .create_task(TaskDraft::new("Too late", date(2024, 6, 10)))
        .await
        .unwrap();

    assert!(h.notifier.scheduled.lock().is_empty());
}

#[tokio::test]
async fn test_delete_of_unconfirmed_task_drops_its_queue_entries() {
    let h = setup(false).await;
    let task = h
        .client
        .create_task(TaskDraft::new("Draft", date(2024, 6, 10)))
        .await
        .unwrap();
    h.client
        .update_task(&task.id, TaskPatch::title("Draft v2"))
        .await
        .unwrap();
    assert_eq!(h.client.queue_status().await.pending_changes, 1);

    h.client.delete_task(&task.id).await.unwrap();

    let status = h.client.queue_status().await;
    assert_eq!(status.pending_tasks, 0);
    assert_eq!(status.pending_changes, 0);
    assert!(h.client.tasks().is_empty());
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn test_offline_edits_of_confirmed_task_are_queued() {
    let h = setup(true).await;
    let task = h
        .client
        .create_task(TaskDraft::new("Groceries", date(2024, 6, 10)))
        .await
        .unwrap();
    h.remote.set_available(false);

    let updated = h
        .client
        .update_task(&task.id, TaskPatch::title("Groceries and bread"))
        .await
        .unwrap();
    assert_eq!(updated.title, "Groceries and bread");
    assert_eq!(h.client.task(&task.id).unwrap().title, "Groceries and bread");

    let cache = LocalCache::new(h.storage.clone());
    let changes = cache.pending_changes().await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].change_type, ChangeType::Update);
    assert_eq!(changes[0].task_id, task.id);

    // A queued delete supersedes the queued update.
    h.client.delete_task(&task.id).await.unwrap();
    let changes = cache.pending_changes().await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].change_type, ChangeType::Delete);
    assert!(h.client.task(&task.id).is_none());
}

#[tokio::test]
async fn test_online_delete_of_missing_remote_task_succeeds() {
    let h = setup(true).await;
    let task = h
        .client
        .create_task(TaskDraft::new("Old", date(2024, 6, 10)))
        .await
        .unwrap();
    h.remote.fail_next(RemoteError::NotFound(task.id.clone()));

    h.client.delete_task(&task.id).await.unwrap();

    assert!(h.client.queue_status().await.is_empty());
    assert!(h.client.tasks().is_empty());
}

#[tokio::test]
async fn test_empty_patch_changes_nothing() {
    let h = setup(true).await;
    let task = h
        .client
        .create_task(TaskDraft::new("Same", date(2024, 6, 10)))
        .await
        .unwrap();
    let calls_before = h.remote.calls().len();

    let unchanged = h
        .client
        .update_task(&task.id, TaskPatch::default())
        .await
        .unwrap();

    assert_eq!(unchanged, task);
    assert_eq!(h.remote.calls().len(), calls_before);
}

#[tokio::test]
async fn test_mutations_emit_events() {
    let h = setup(true).await;
    let events = h.client.events();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    events.register_callback(move |event| sink.lock().push(event));

    let task = h
        .client
        .create_task(TaskDraft::new("Evented", date(2024, 6, 10)))
        .await
        .unwrap();
    h.client.delete_task(&task.id).await.unwrap();
    events.process_events();

    let seen = seen.lock().clone();
    assert!(seen.contains(&SyncEvent::TaskCreated {
        id: task.id.clone(),
        title: "Evented".to_string(),
        queued: false,
    }));
    assert!(seen.contains(&SyncEvent::TaskDeleted {
        id: task.id,
        queued: false,
    }));
}

#[tokio::test]
async fn test_update_waits_behind_queued_update_of_same_task() {
    let h = setup(true).await;
    let task = h
        .client
        .create_task(TaskDraft::new("Draft", date(2024, 6, 10)))
        .await
        .unwrap();
    h.remote.fail_next(RemoteError::Unavailable("timeout".to_string()));

    h.client
        .update_task(&task.id, TaskPatch::title("Draft A"))
        .await
        .unwrap();
    h.client
        .update_task(&task.id, TaskPatch::title("Draft B"))
        .await
        .unwrap();

    // Only the first update reached the remote; the second queued behind it.
    let updates = |calls: Vec<String>| calls.iter().filter(|c| c.starts_with("update")).count();
    assert_eq!(updates(h.remote.calls()), 1);
    assert_eq!(h.client.queue_status().await.pending_changes, 2);

    let report = h.client.reconcile().await;
    assert_eq!(report.changes_replayed, 2);
    assert_eq!(h.remote.task("remote-1").unwrap().title, "Draft B");
    assert_eq!(h.client.task(&task.id).unwrap().title, "Draft B");
    assert!(h.client.queue_status().await.is_empty());
}

#[tokio::test]
async fn test_delete_waits_behind_queued_update_of_same_task() {
    let h = setup(true).await;
    let task = h
        .client
        .create_task(TaskDraft::new("Errand", date(2024, 6, 10)))
        .await
        .unwrap();
    h.remote.fail_next(RemoteError::Unavailable("timeout".to_string()));
    h.client
        .update_task(&task.id, TaskPatch::title("Errand, later"))
        .await
        .unwrap();

    h.client.delete_task(&task.id).await.unwrap();

    assert!(!h.remote.calls().iter().any(|c| c.starts_with("delete")));
    let cache = LocalCache::new(h.storage.clone());
    let changes = cache.pending_changes().await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].change_type, ChangeType::Delete);

    let report = h.client.reconcile().await;
    assert_eq!(report.changes_replayed, 1);
    assert!(h.remote.tasks().is_empty());
    assert!(h.client.queue_status().await.is_empty());
}

#[tokio::test]
async fn test_delete_during_failed_create_is_not_requeued() {
    let h = setup(true).await;
    let gate = h.remote.hold_next_create();
    h.remote.fail_next(RemoteError::Unavailable("timeout".to_string()));

    let create = h
        .client
        .create_task(TaskDraft::new("Short lived", date(2024, 6, 10)));
    let delete = async {
        h.remote.create_started().await;
        let id = h.client.tasks()[0].id.clone();
        h.client.delete_task(&id).await.unwrap();
        gate.notify_one();
        id
    };
    let (created, deleted) = tokio::join!(create, delete);

    assert_eq!(created.unwrap().id, deleted);
    assert!(h.client.tasks().is_empty());
    assert!(h.client.queue_status().await.is_empty());
    assert!(h.notifier.scheduled.lock().is_empty());

    let report = h.client.reconcile().await;
    assert_eq!(report.attempted(), 0);
    assert!(h.remote.tasks().is_empty());
    let creates = h.remote.calls().into_iter().filter(|c| c.starts_with("create"));
    assert_eq!(creates.count(), 1);
}

#[tokio::test]
async fn test_delete_during_successful_create_removes_remote_task() {
    let h = setup(true).await;
    let gate = h.remote.hold_next_create();

    let create = h
        .client
        .create_task(TaskDraft::new("Changed my mind", date(2024, 6, 10)));
    let delete = async {
        h.remote.create_started().await;
        let id = h.client.tasks()[0].id.clone();
        h.client.delete_task(&id).await.unwrap();
        gate.notify_one();
    };
    let (created, ()) = tokio::join!(create, delete);

    assert_eq!(created.unwrap().id, TaskId::from("remote-1"));
    assert!(h.remote.tasks().is_empty());
    assert!(h.remote.calls().contains(&"delete:remote-1".to_string()));
    assert!(h.client.tasks().is_empty());
    assert!(h.client.queue_status().await.is_empty());
}
