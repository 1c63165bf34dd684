use crate::models::TaskId;
use thiserror::Error;

/// Errors surfaced to callers of the client API.
///
/// Only `Validation`, `NotAuthenticated` and `TaskNotFound` come back from a
/// mutation; remote failures are turned into queue entries before they reach
/// the caller.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Task not found on remote: {0}")]
    NotFound(TaskId),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Stored value could not be decoded: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Failures of notification or calendar side effects. Logged, never propagated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SideEffectError {
    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Calendar failed: {0}")]
    Calendar(String),
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,
}
