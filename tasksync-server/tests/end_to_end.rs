use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tasksync_client::{MemoryStorage, RemoteStore, TaskClient, WebSocketRemote};
use tasksync_core::protocol::{ClientMessage, ServerMessage};
use tasksync_core::{RemoteError, TaskDraft, TaskId, TaskPatch, TaskStatus};
use tasksync_server::{router, AppState};
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Serve the router on an ephemeral port and return its WebSocket URL.
async fn spawn_server() -> anyhow::Result<(String, Arc<AppState>)> {
    let state = Arc::new(AppState::new());
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = router(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("ws://{addr}/ws"), state))
}

fn draft(title: &str) -> TaskDraft {
    TaskDraft::new(title, chrono::NaiveDate::from_ymd_opt(2024, 6, 10).unwrap())
}

#[tokio::test]
async fn test_remote_create_update_delete() -> anyhow::Result<()> {
    let (url, state) = spawn_server().await?;
    let remote = WebSocketRemote::new(url, "alice", TIMEOUT);

    let task = draft("Pay rent").into_task(TaskId::temporary(1), "alice", chrono::Utc::now());
    let id = remote.create(&task).await?;
    assert!(!id.is_temporary());
    assert_eq!(state.store.count("alice"), 1);

    remote
        .update(&id, &TaskPatch::status(TaskStatus::Completed))
        .await?;
    assert!(state.store.snapshot("alice")[0].is_completed());

    remote.delete(&id).await?;
    // Deleting again is not an error.
    remote.delete(&id).await?;
    assert_eq!(state.store.count("alice"), 0);

    let missing = remote.update(&id, &TaskPatch::title("Gone")).await;
    assert_eq!(missing, Err(RemoteError::NotFound(id)));
    Ok(())
}

#[tokio::test]
async fn test_subscription_receives_snapshots() -> anyhow::Result<()> {
    let (url, _state) = spawn_server().await?;
    let remote = WebSocketRemote::new(url, "alice", TIMEOUT);

    let mut snapshots = remote.subscribe("alice").await?;
    let initial = tokio::time::timeout(TIMEOUT, snapshots.recv()).await?;
    assert_eq!(initial, Some(Vec::new()));

    let task = draft("Water plants").into_task(TaskId::temporary(1), "alice", chrono::Utc::now());
    let id = remote.create(&task).await?;

    let pushed = tokio::time::timeout(TIMEOUT, snapshots.recv())
        .await?
        .unwrap_or_default();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].id, id);
    assert_eq!(pushed[0].owner_id, "alice");

    assert!(remote.subscribe("bob").await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_messages_before_authenticate_are_rejected() -> anyhow::Result<()> {
    let (url, _state) = spawn_server().await?;
    let (mut ws, _) = connect_async(url.as_str()).await?;

    ws.send(Message::Text(serde_json::to_string(&ClientMessage::Ping)?))
        .await?;

    let reply = loop {
        match tokio::time::timeout(TIMEOUT, ws.next()).await? {
            Some(Ok(Message::Text(text))) => break serde_json::from_str::<ServerMessage>(&text)?,
            Some(Ok(_)) => continue,
            other => anyhow::bail!("connection ended without a reply: {other:?}"),
        }
    };
    assert!(matches!(reply, ServerMessage::AuthError { .. }));
    Ok(())
}

#[tokio::test]
async fn test_client_syncs_through_server() -> anyhow::Result<()> {
    let (url, state) = spawn_server().await?;
    let remote = Arc::new(WebSocketRemote::new(url, "alice", TIMEOUT));
    let client = TaskClient::builder(Arc::new(MemoryStorage::new()), remote)
        .owner("alice")
        .online(false)
        .build()
        .await;

    let offline = client.create_task(draft("Written offline")).await?;
    assert!(offline.id.is_temporary());
    client.toggle_status(&offline.id).await?;
    assert_eq!(state.store.count("alice"), 0);

    client.set_online(true);
    client.reconcile().await;

    let stored = state.store.snapshot("alice");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].title, "Written offline");
    assert_eq!(stored[0].status, TaskStatus::Completed);
    assert!(client.queue_status().await.is_empty());
    assert!(client.task(&stored[0].id).is_some());

    let online = client.create_task(draft("Written online")).await?;
    assert!(!online.id.is_temporary());
    assert_eq!(state.store.count("alice"), 2);
    Ok(())
}
