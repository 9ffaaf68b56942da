use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use std::collections::HashMap;
use std::fmt;

/// Describes an agent to clients performing discovery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub version: String,
    pub capabilities: AgentCapabilities,
    pub default_input_modes: Vec<String>,
    pub default_output_modes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<AgentSkill>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Optional protocol features an agent supports
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    pub streaming: bool,
    pub push_notifications: bool,
    pub state_transition_history: bool,
}

/// A single capability advertised on the agent card
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

/// A unit of client-requested work tracked through its lifecycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub state: TaskState,
    /// The original input followed by any input supplied while `input-required`.
    pub inputs: Vec<Message>,
    pub history: Vec<TaskEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Whether the task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether the task is currently being driven by the agent
    pub fn is_in_flight(&self) -> bool {
        matches!(self.state, TaskState::Submitted | TaskState::Working)
    }
}

/// Represents the state of a task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    /// Terminal states are absorbing
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Canceled)
    }

    /// Whether the lifecycle state machine permits moving from `self` to `next`
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;

        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Canceled) => true,
            (Submitted, Working | Failed) => true,
            (Working, Working | InputRequired | Completed | Failed) => true,
            (InputRequired, Working | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Submitted => "submitted",
            TaskState::Working => "working",
            TaskState::InputRequired => "input-required",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Represents an error that occurred during task processing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Who authored a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

/// Represents a message in the A2A protocol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            role,
            parts,
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    pub fn agent_text(text: impl Into<String>) -> Self {
        Self::new(Role::Agent, vec![Part::text(text)])
    }

    /// Concatenated text of all text parts
    pub fn text(&self) -> String {
        parts_text(&self.parts)
    }
}

/// Represents a part of a message or artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Part {
    Text { text: String },
    Data { data: serde_json::Value },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }
}

pub(crate) fn parts_text(parts: &[Part]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            Part::Text { text } => Some(text.as_str()),
            Part::Data { .. } => None,
        })
        .collect()
}

/// Output produced by the agent, either a partial chunk or the final result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub parts: Vec<Part>,
    pub index: u32,
    pub last_chunk: bool,
}

impl Artifact {
    pub fn partial(parts: Vec<Part>) -> Self {
        Self { parts, index: 0, last_chunk: false }
    }

    pub fn last(parts: Vec<Part>) -> Self {
        Self { parts, index: 0, last_chunk: true }
    }

    pub fn text(&self) -> String {
        parts_text(&self.parts)
    }
}

/// One entry in a task's ordered history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub task_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TaskEventKind,
    /// Closes the live feed: set on terminal and `input-required` status updates.
    #[serde(rename = "final")]
    pub is_final: bool,
}

impl TaskEvent {
    /// The new state, for status updates
    pub fn state(&self) -> Option<TaskState> {
        match &self.kind {
            TaskEventKind::StatusUpdate { state, .. } => Some(*state),
            TaskEventKind::ArtifactUpdate { .. } => None,
        }
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        match &self.kind {
            TaskEventKind::ArtifactUpdate { artifact } => Some(artifact),
            TaskEventKind::StatusUpdate { .. } => None,
        }
    }

    /// Whether this is the task's terminal marker
    pub fn is_terminal(&self) -> bool {
        self.state().map_or(false, TaskState::is_terminal)
    }
}

/// Payload of a task event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TaskEventKind {
    StatusUpdate {
        state: TaskState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<Message>,
    },
    ArtifactUpdate {
        artifact: Artifact,
    },
}

impl TaskEventKind {
    pub fn status(state: TaskState) -> Self {
        TaskEventKind::StatusUpdate { state, message: None }
    }

    pub fn status_with_message(state: TaskState, message: Message) -> Self {
        TaskEventKind::StatusUpdate { state, message: Some(message) }
    }

    pub fn artifact(artifact: Artifact) -> Self {
        TaskEventKind::ArtifactUpdate { artifact }
    }
}

/// Parameters for `tasks/send` and `tasks/sendSubscribe`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSendParams {
    #[serde(alias = "id")]
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_output_modes: Option<Vec<String>>,
}

impl TaskSendParams {
    pub fn new(task_id: impl Into<String>, message: Message) -> Self {
        Self {
            task_id: task_id.into(),
            session_id: None,
            message,
            accepted_output_modes: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_accepted_output_modes(mut self, modes: Vec<String>) -> Self {
        self.accepted_output_modes = Some(modes);
        self
    }
}

/// Parameters for operations addressing a single task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdParams {
    #[serde(alias = "id")]
    pub task_id: String,
}

/// Parameters for `tasks/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    pub session_id: String,
}

/// Represents a JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Represents a JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// Represents a JSON-RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Utility function to create a JSON-RPC response
pub fn create_response(id: String, result: serde_json::Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: Some(result),
        error: None,
    }
}

/// Utility function to create a JSON-RPC error response
pub fn create_error_response(id: String, code: i32, message: String, data: Option<serde_json::Value>) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: None,
        error: Some(JsonRpcError {
            code,
            message,
            data,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_machine_edges() {
        use TaskState::*;

        assert!(Submitted.can_transition_to(Working));
        assert!(Working.can_transition_to(InputRequired));
        assert!(InputRequired.can_transition_to(Working));
        assert!(InputRequired.can_transition_to(Canceled));
        assert!(!Submitted.can_transition_to(Completed));
        assert!(!InputRequired.can_transition_to(Completed));
        for terminal in [Completed, Failed, Canceled] {
            assert!(terminal.is_terminal());
            for next in [Submitted, Working, InputRequired, Completed, Failed, Canceled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_task_state_wire_names() {
        assert_eq!(serde_json::to_value(TaskState::InputRequired).unwrap(), json!("input-required"));
        assert_eq!(TaskState::Canceled.to_string(), "canceled");
    }

    #[test]
    fn test_task_event_serialization() {
        let event = TaskEvent {
            task_id: "t1".to_string(),
            sequence: 3,
            timestamp: Utc::now(),
            kind: TaskEventKind::artifact(Artifact::partial(vec![Part::text("ab")])),
            is_final: false,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "artifact-update");
        assert_eq!(value["taskId"], "t1");
        assert_eq!(value["final"], false);
        assert_eq!(value["artifact"]["lastChunk"], false);
        assert_eq!(value["artifact"]["parts"][0]["text"], "ab");

        let parsed: TaskEvent = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_send_params_accept_id_alias() {
        let params: TaskSendParams = serde_json::from_value(json!({
            "id": "t9",
            "sessionId": "s1",
            "message": Message::user_text("hello"),
        }))
        .unwrap();

        assert_eq!(params.task_id, "t9");
        assert_eq!(params.session_id.as_deref(), Some("s1"));
        assert_eq!(params.message.text(), "hello");
        assert!(params.accepted_output_modes.is_none());
    }
}
