use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use tokio_util::sync::CancellationToken;

use crate::error::AdapterError;
use crate::types::{Message, Part, Task};

pub mod echo;

/// Content types an agent produces when it does not say otherwise
pub const DEFAULT_CONTENT_TYPES: &[&str] = &["text", "text/plain"];

/// Everything an adapter gets to know about the task it is working on
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub task_id: String,
    pub session_id: Option<String>,
    /// The original input followed by any input supplied later.
    pub inputs: Vec<Message>,
}

impl AgentRequest {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            session_id: task.session_id.clone(),
            inputs: task.inputs.clone(),
        }
    }

    /// Text of the most recent input
    pub fn query(&self) -> String {
        self.inputs.last().map(Message::text).unwrap_or_default()
    }
}

/// Result of a single-shot invocation
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    Completed(Vec<Part>),
    InputRequired(String),
}

/// One element of an adapter's incremental output
#[derive(Debug, Clone, PartialEq)]
pub enum AgentUpdate {
    /// Progress note; the task stays `working`.
    Working(String),
    /// A partial artifact chunk.
    Partial(Vec<Part>),
    /// The agent needs more input from the client. Ends the sequence.
    InputRequired(String),
    /// The final artifact. Ends the sequence.
    Completed(Vec<Part>),
}

impl AgentUpdate {
    /// Whether the sequence is over after this element
    pub fn is_final(&self) -> bool {
        matches!(self, AgentUpdate::InputRequired(_) | AgentUpdate::Completed(_))
    }
}

impl From<AgentOutcome> for AgentUpdate {
    fn from(outcome: AgentOutcome) -> Self {
        match outcome {
            AgentOutcome::Completed(parts) => AgentUpdate::Completed(parts),
            AgentOutcome::InputRequired(text) => AgentUpdate::InputRequired(text),
        }
    }
}

pub type AgentUpdateStream = BoxStream<'static, Result<AgentUpdate, AdapterError>>;

/// The domain logic behind an A2A agent.
///
/// Implementations must watch `cancel` at their own yield points; the task
/// manager never aborts them.
#[async_trait]
pub trait AgentAdapter: Send + Sync + 'static {
    /// Output content types this agent can produce
    fn supported_content_types(&self) -> Vec<String> {
        DEFAULT_CONTENT_TYPES.iter().map(|s| s.to_string()).collect()
    }

    /// Produce the final result in one step
    async fn invoke(
        &self,
        request: AgentRequest,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome, AdapterError>;

    /// Produce a lazy sequence of updates ending in a final element.
    ///
    /// Defaults to a single element carrying the result of `invoke`.
    fn stream(self: Arc<Self>, request: AgentRequest, cancel: CancellationToken) -> AgentUpdateStream {
        Box::pin(stream::once(async move {
            self.invoke(request, cancel).await.map(AgentUpdate::from)
        }))
    }
}

/// Whether a client accepting `accepted` can use output in `supported`.
///
/// A client that states no preference accepts anything.
pub fn modalities_compatible(accepted: Option<&[String]>, supported: &[String]) -> bool {
    match accepted {
        None => true,
        Some(accepted) if accepted.is_empty() || supported.is_empty() => true,
        Some(accepted) => accepted.iter().any(|mode| supported.contains(mode)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct Fixed;

    #[async_trait]
    impl AgentAdapter for Fixed {
        async fn invoke(
            &self,
            request: AgentRequest,
            _cancel: CancellationToken,
        ) -> Result<AgentOutcome, AdapterError> {
            Ok(AgentOutcome::Completed(vec![Part::text(format!("re: {}", request.query()))]))
        }
    }

    #[tokio::test]
    async fn test_default_stream_wraps_invoke() {
        let request = AgentRequest {
            task_id: "t1".to_string(),
            session_id: None,
            inputs: vec![Message::user_text("ping")],
        };

        let updates: Vec<_> = Arc::new(Fixed)
            .stream(request, CancellationToken::new())
            .collect()
            .await;

        assert_eq!(updates.len(), 1);
        assert_eq!(
            updates[0].as_ref().unwrap(),
            &AgentUpdate::Completed(vec![Part::text("re: ping")])
        );
    }

    #[test]
    fn test_modalities_compatible() {
        let supported = vec!["text".to_string(), "text/plain".to_string()];

        assert!(modalities_compatible(None, &supported));
        assert!(modalities_compatible(Some(&[][..]), &supported));
        assert!(modalities_compatible(Some(&["text/plain".to_string()][..]), &supported));
        assert!(!modalities_compatible(Some(&["image/png".to_string()][..]), &supported));
    }

    #[test]
    fn test_request_query_uses_latest_input() {
        let request = AgentRequest {
            task_id: "t1".to_string(),
            session_id: Some("s1".to_string()),
            inputs: vec![Message::user_text("first"), Message::user_text("second")],
        };
        assert_eq!(request.query(), "second");
    }
}
