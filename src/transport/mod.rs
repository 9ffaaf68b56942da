use std::sync::Arc;
use async_trait::async_trait;
use anyhow::Result;
use futures::stream::BoxStream;
use crate::types::JsonRpcResponse;

pub mod nats;

/// Responses a handler produces for one request
pub enum Reply {
    /// A single JSON-RPC response.
    Single(JsonRpcResponse),
    /// A feed of responses, one per task event, published in order.
    Stream(BoxStream<'static, JsonRpcResponse>),
}

/// Handles decoded JSON-RPC requests on behalf of a transport
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: crate::types::JsonRpcRequest) -> Result<Reply>;
}

// Object-safe so the server can hold any transport behind an Arc
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the transport, listening for incoming requests
    async fn start(&self) -> Result<()>;

    /// Stop the transport, terminating all connections
    async fn stop(&self) -> Result<()>;

    /// Run the transport with the provided request handler
    async fn run(&self, handler: Arc<dyn RequestHandler>) -> Result<()>;
}

/// Factory trait for creating transport instances
pub trait TransportFactory: Send + Sync {
    /// Create a new transport instance
    fn create(&self) -> Result<Arc<dyn Transport>>;
}
