use crate::models::{Task, TaskId, TaskPatch};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    // Authentication
    Authenticate {
        owner_id: String,
    },

    // Task operations
    CreateTask {
        request_id: Uuid,
        task: Task,
    },
    UpdateTask {
        request_id: Uuid,
        task_id: TaskId,
        patch: TaskPatch,
    },
    DeleteTask {
        request_id: Uuid,
        task_id: TaskId,
    },

    // Live updates
    Subscribe,

    // Heartbeat
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    // Authentication responses
    AuthSuccess {
        owner_id: String,
    },
    AuthError {
        reason: String,
    },

    // Task acknowledgements
    TaskCreated {
        request_id: Uuid,
        task_id: TaskId,
    },
    TaskUpdated {
        request_id: Uuid,
        task_id: TaskId,
    },
    TaskDeleted {
        request_id: Uuid,
        task_id: TaskId,
    },

    // Full task list of the owner, pushed to subscribers after every change
    Snapshot {
        tasks: Vec<Task>,
    },

    // Errors
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<Uuid>,
        code: ErrorCode,
        message: String,
    },

    // Heartbeat
    Pong,
}

impl ServerMessage {
    /// The request this message answers, if any.
    pub fn request_id(&self) -> Option<Uuid> {
        match self {
            ServerMessage::TaskCreated { request_id, .. }
            | ServerMessage::TaskUpdated { request_id, .. }
            | ServerMessage::TaskDeleted { request_id, .. } => Some(*request_id),
            ServerMessage::Error { request_id, .. } => *request_id,
            _ => None,
        }
    }

    pub fn error(request_id: Option<Uuid>, code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            request_id,
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidAuth,
    PermissionDenied,
    NotFound,
    InvalidMessage,
    ServerError,
}
