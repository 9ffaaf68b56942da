//! Task lifecycle management for the A2A (Agent-to-Agent) protocol.
//!
//! A client hands the agent a task; the [`TaskManager`] records it in the
//! [`TaskStore`], drives an [`AgentAdapter`] to produce a result, and turns
//! every step into an ordered [`TaskEvent`] that any number of subscribers
//! can follow live or replay later.
//!
//! The crate is modular, with components for:
//! - Task state and history (`task_store`)
//! - Event fan-out to subscribers (`publisher`)
//! - The lifecycle state machine (`task_manager`)
//! - The agent boundary (`adapter`)
//! - A JSON-RPC binding over NATS (`server`, `transport`)

pub mod adapter;
pub mod error;
pub mod publisher;
pub mod server;
pub mod server_builder;
pub mod task_manager;
pub mod task_store;
pub mod transport;
pub mod types;

// Re-export commonly used items
pub use adapter::{AgentAdapter, AgentOutcome, AgentRequest, AgentUpdate};
pub use adapter::echo::EchoAgent;
pub use error::{AdapterError, TaskManagerError, TaskResult};
pub use publisher::{EventSubscription, StartFrom};
pub use server::{A2aHandler, Server};
pub use server_builder::ServerBuilder;
pub use task_manager::TaskManager;
pub use task_store::TaskStore;
pub use transport::{Reply, RequestHandler, Transport, TransportFactory};
pub use transport::nats::{NatsTransport, NatsTransportFactory};

// Re-export key types
pub use types::{
    AgentCard, Artifact, JsonRpcRequest, JsonRpcResponse, Message, Part, Role, Task, TaskEvent,
    TaskEventKind, TaskSendParams, TaskState,
};
