use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::adapter::{AgentAdapter, AgentOutcome, AgentRequest, AgentUpdate, AgentUpdateStream};
use crate::error::AdapterError;
use crate::types::{AgentSkill, Part};

const PROMPT_FOR_INPUT: &str = "Send some text and it will be echoed back.";

/// Demonstration agent that echoes its input, streaming it word by word
pub struct EchoAgent {
    chunk_delay: Duration,
}

impl Default for EchoAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoAgent {
    pub fn new() -> Self {
        Self {
            chunk_delay: Duration::from_millis(50),
        }
    }

    /// Pause between streamed chunks
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn skill() -> AgentSkill {
        AgentSkill {
            id: "echo".to_string(),
            name: "Echo".to_string(),
            description: "Repeats the text it is sent.".to_string(),
            tags: vec!["echo".to_string(), "demo".to_string()],
            examples: vec!["hello there".to_string()],
        }
    }

    fn reply(query: &str) -> String {
        format!("Echo: {}", query.trim())
    }

    /// The updates a streamed echo of `query` goes through
    fn plan(query: &str) -> Vec<AgentUpdate> {
        if query.trim().is_empty() {
            return vec![AgentUpdate::InputRequired(PROMPT_FOR_INPUT.to_string())];
        }

        let reply = Self::reply(query);
        let mut updates = vec![AgentUpdate::Working("Processing your request...".to_string())];
        let mut end = 0;
        for word in reply.split_inclusive(' ') {
            end += word.len();
            updates.push(AgentUpdate::Partial(vec![Part::text(reply[..end].trim_end())]));
        }
        updates.push(AgentUpdate::Completed(vec![Part::text(reply)]));
        updates
    }
}

#[async_trait]
impl AgentAdapter for EchoAgent {
    async fn invoke(
        &self,
        request: AgentRequest,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome, AdapterError> {
        let query = request.query();
        if query.trim().is_empty() {
            return Ok(AgentOutcome::InputRequired(PROMPT_FOR_INPUT.to_string()));
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(AdapterError::new("Echo canceled")),
            _ = tokio::time::sleep(self.chunk_delay) => {
                Ok(AgentOutcome::Completed(vec![Part::text(Self::reply(&query))]))
            }
        }
    }

    fn stream(self: Arc<Self>, request: AgentRequest, cancel: CancellationToken) -> AgentUpdateStream {
        let delay = self.chunk_delay;
        let task_id = request.task_id.clone();
        let steps = Self::plan(&request.query()).into_iter();

        Box::pin(stream::unfold((steps, cancel), move |(mut steps, cancel)| {
            let task_id = task_id.clone();
            async move {
                let update = steps.next()?;
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Echo for task {} stopped by cancellation", task_id);
                        return None;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                Some((Ok::<_, AdapterError>(update), (steps, cancel)))
            }
        }))
    }
}
