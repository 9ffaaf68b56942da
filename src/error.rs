use crate::types::TaskState;

/// JSON-RPC code for an unknown task
pub const TASK_NOT_FOUND: i32 = -32001;
/// JSON-RPC code for an operation the task's current state forbids
pub const TASK_STATE_CONFLICT: i32 = -32002;
/// JSON-RPC code for requested output modes the agent cannot produce
pub const INCOMPATIBLE_CONTENT_TYPES: i32 = -32005;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const PARSE_ERROR: i32 = -32700;

/// Failure raised by an agent adapter while producing a result
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct AdapterError {
    pub message: String,
}

impl AdapterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Errors returned by task lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum TaskManagerError {
    #[error("Task not found: {task_id}")]
    NotFound { task_id: String },

    #[error("Cannot {operation} task {task_id} in state {state}")]
    Conflict {
        task_id: String,
        state: TaskState,
        operation: &'static str,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Incompatible content types: requested {requested:?}, supported {supported:?}")]
    IncompatibleContentTypes {
        requested: Vec<String>,
        supported: Vec<String>,
    },
}

impl TaskManagerError {
    pub(crate) fn not_found(task_id: &str) -> Self {
        TaskManagerError::NotFound { task_id: task_id.to_string() }
    }

    pub(crate) fn conflict(task_id: &str, state: TaskState, operation: &'static str) -> Self {
        TaskManagerError::Conflict {
            task_id: task_id.to_string(),
            state,
            operation,
        }
    }

    /// JSON-RPC error code for this error
    pub fn rpc_code(&self) -> i32 {
        match self {
            TaskManagerError::NotFound { .. } => TASK_NOT_FOUND,
            TaskManagerError::Conflict { .. } => TASK_STATE_CONFLICT,
            TaskManagerError::IncompatibleContentTypes { .. } => INCOMPATIBLE_CONTENT_TYPES,
            TaskManagerError::Transport(_) => INTERNAL_ERROR,
        }
    }
}

pub type TaskResult<T> = std::result::Result<T, TaskManagerError>;
