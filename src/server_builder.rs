// src/server_builder.rs

use std::sync::Arc;
use anyhow::{Context, Result};
use tokio::runtime::Runtime;
use uuid::Uuid;

use crate::adapter::AgentAdapter;
use crate::publisher::DEFAULT_SUBSCRIBER_CAPACITY;
use crate::server::Server;
use crate::task_manager::TaskManager;
use crate::task_store::TaskStore;
use crate::transport::TransportFactory;
use crate::types::{AgentCapabilities, AgentCard, AgentSkill};

/// Builder for Server
pub struct ServerBuilder {
    adapter: Option<Arc<dyn AgentAdapter>>,
    agent_id: Option<Uuid>,
    agent_name: Option<String>,
    agent_description: Option<String>,
    agent_url: Option<String>,
    agent_version: Option<String>,
    skills: Vec<AgentSkill>,
    subscriber_capacity: usize,
    transport_factory: Option<Box<dyn TransportFactory>>,
    runtime: Option<Runtime>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    /// Create a new ServerBuilder
    pub fn new() -> Self {
        Self {
            adapter: None,
            agent_id: None,
            agent_name: None,
            agent_description: None,
            agent_url: None,
            agent_version: None,
            skills: Vec::new(),
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            transport_factory: None,
            runtime: None,
        }
    }

    /// Set the agent adapter that does the actual work
    pub fn with_adapter<A>(mut self, adapter: A) -> Self
    where
        A: AgentAdapter,
    {
        self.adapter = Some(Arc::new(adapter));
        self
    }

    /// Set the agent ID
    pub fn with_agent_id(mut self, agent_id: Uuid) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    /// Set the agent name
    pub fn with_agent_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = Some(name.into());
        self
    }

    /// Set the agent description
    pub fn with_agent_description(mut self, description: impl Into<String>) -> Self {
        self.agent_description = Some(description.into());
        self
    }

    /// Set the URL advertised on the agent card
    pub fn with_agent_url(mut self, url: impl Into<String>) -> Self {
        self.agent_url = Some(url.into());
        self
    }

    pub fn with_agent_version(mut self, version: impl Into<String>) -> Self {
        self.agent_version = Some(version.into());
        self
    }

    /// Advertise a skill on the agent card
    pub fn with_skill(mut self, skill: AgentSkill) -> Self {
        self.skills.push(skill);
        self
    }

    /// Queue depth for each event subscriber
    pub fn with_subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = capacity;
        self
    }

    /// Set the transport factory
    pub fn with_transport_factory(mut self, factory: impl TransportFactory + 'static) -> Self {
        self.transport_factory = Some(Box::new(factory));
        self
    }

    /// Set the runtime
    pub fn with_runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the task manager alone, without a transport
    pub fn build_task_manager(&mut self) -> Result<TaskManager> {
        let adapter = self
            .adapter
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Agent adapter is required"))?;

        let modes = adapter.supported_content_types();
        let agent = AgentCard {
            id: self.agent_id.unwrap_or_else(Uuid::new_v4),
            name: self.agent_name.clone().unwrap_or_else(|| "A2A Agent".to_string()),
            description: self.agent_description.clone().unwrap_or_else(|| {
                "A generic A2A agent implementation".to_string()
            }),
            url: self.agent_url.clone(),
            version: self
                .agent_version
                .clone()
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            capabilities: AgentCapabilities {
                streaming: true,
                push_notifications: false,
                state_transition_history: true,
            },
            default_input_modes: modes.clone(),
            default_output_modes: modes,
            skills: self.skills.clone(),
            metadata: None,
        };

        let store = Arc::new(TaskStore::with_subscriber_capacity(self.subscriber_capacity));
        Ok(TaskManager::new(agent, store, adapter))
    }

    /// Build the server
    pub fn build(mut self) -> Result<Server> {
        let task_manager = self.build_task_manager()?;

        let transport_factory = self
            .transport_factory
            .take()
            .ok_or_else(|| anyhow::anyhow!("Transport factory is required"))?;

        let runtime = match self.runtime.take() {
            Some(runtime) => runtime,
            None => Runtime::new().context("Failed to create Tokio runtime")?,
        };

        let transport = transport_factory.create()?;

        Ok(Server::new(task_manager, transport, runtime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::echo::EchoAgent;
    use crate::transport::nats::NatsTransportFactory;
    use std::time::Duration;

    #[test]
    fn test_build_requires_adapter() {
        let result = ServerBuilder::new()
            .with_transport_factory(NatsTransportFactory::new(
                "nats://localhost:4222",
                "a2a.test",
                Duration::from_secs(1),
            ))
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_build_requires_transport() {
        let result = ServerBuilder::new().with_adapter(EchoAgent::new()).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_agent_card_from_builder() {
        let agent_id = Uuid::new_v4();
        let manager = ServerBuilder::new()
            .with_adapter(EchoAgent::new())
            .with_agent_id(agent_id)
            .with_agent_name("Echo")
            .with_agent_url("nats://localhost:4222/a2a.echo")
            .with_skill(EchoAgent::skill())
            .build_task_manager()
            .unwrap();

        let card = manager.agent();
        assert_eq!(card.id, agent_id);
        assert_eq!(card.name, "Echo");
        assert!(card.capabilities.streaming);
        assert_eq!(card.default_output_modes, vec!["text".to_string(), "text/plain".to_string()]);
        assert_eq!(card.skills.len(), 1);
        assert_eq!(card.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_build_server() {
        let server = ServerBuilder::new()
            .with_adapter(EchoAgent::new())
            .with_transport_factory(NatsTransportFactory::new(
                "nats://localhost:4222",
                "a2a.test",
                Duration::from_secs(1),
            ))
            .build()
            .unwrap();

        assert_eq!(server.task_manager().agent().name, "A2A Agent");
    }
}
