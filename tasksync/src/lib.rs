//! tasksync - Offline-first task and reminder synchronization
//!
//! This crate provides a unified API for the tasksync engine.
//!
//! # Example
//!
//! ```ignore
//! use tasksync::{ClientConfig, TaskClient, TaskDraft};
//!
//! let client = TaskClient::connect(&ClientConfig::from_env().with_owner("alice")).await?;
//! client.set_online(true);
//! client.create_task(TaskDraft::new("Pay rent", today)).await?;
//! ```

// Re-export client types
pub use tasksync_client::{
    AppLifecycle, ClientConfig, QueueStatus, ReconcileReport, RetryPolicy, SyncEvent, TaskClient,
    TaskClientBuilder, UnresolvedEntry,
};

// Re-export server types
pub use tasksync_server::{router, AppState as Server};

// Re-export core types that external applications may need
pub use tasksync_core::errors::{ClientError, RemoteError};
pub use tasksync_core::models::{Priority, Settings, Task, TaskDraft, TaskId, TaskPatch, TaskStatus};
pub use tasksync_core::protocol::{ClientMessage, ServerMessage};
pub use tasksync_core::views::{build_view, TaskOrder, View, ViewMode};
pub use tasksync_core::SyncResult;
