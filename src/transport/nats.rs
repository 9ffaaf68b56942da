use std::{sync::Arc, time::Duration};
use anyhow::{Context, Result};
use async_nats::{Client, ConnectOptions, Subject};
use futures::StreamExt;
use log::{debug, error, info, warn};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::{TaskManagerError, TaskResult, INTERNAL_ERROR, PARSE_ERROR};
use crate::types::{create_error_response, JsonRpcRequest, JsonRpcResponse};
use crate::transport::{Reply, RequestHandler, Transport};

/// Transport implementation using NATS request/reply
pub struct NatsTransport {
    client: Mutex<Option<Client>>,
    url: String,
    subject: String,
    connect_timeout: Duration,
}

impl NatsTransport {
    /// Create a new NatsTransport
    pub fn new(url: &str, subject: &str, connect_timeout: Duration) -> Self {
        Self {
            client: Mutex::new(None),
            url: url.to_string(),
            subject: subject.to_string(),
            connect_timeout,
        }
    }

    /// Connect to NATS server
    async fn connect(&self) -> Result<Client> {
        let mut client_guard = self.client.lock().await;

        if let Some(client) = &*client_guard {
            return Ok(client.clone());
        }

        debug!("Connecting to NATS at {}", self.url);
        let options = ConnectOptions::default();

        let connect_fut = async_nats::connect_with_options(&self.url, options);
        let client = timeout(self.connect_timeout, connect_fut)
            .await
            .context("NATS connection timeout")?
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS at {}", self.url);
        *client_guard = Some(client.clone());

        Ok(client)
    }
}

/// Publish one response to a reply subject
async fn publish_response(client: &Client, reply_subject: &str, response: &JsonRpcResponse) -> TaskResult<()> {
    let payload = serde_json::to_vec(response)
        .map_err(|e| TaskManagerError::Transport(format!("Failed to encode response: {}", e)))?;

    client
        .publish(Subject::from(reply_subject), payload.into())
        .await
        .map_err(|e| TaskManagerError::Transport(format!("Failed to publish to {}: {}", reply_subject, e)))
}

/// Deliver a handler's reply. A streamed reply is forwarded event by event;
/// if one publish fails the rest of that stream is abandoned.
async fn deliver(client: &Client, reply_subject: &str, reply: Reply) {
    match reply {
        Reply::Single(response) => {
            if let Err(e) = publish_response(client, reply_subject, &response).await {
                error!("Failed to send response: {}", e);
            }
        }
        Reply::Stream(mut responses) => {
            let mut delivered = 0usize;
            while let Some(response) = responses.next().await {
                if let Err(e) = publish_response(client, reply_subject, &response).await {
                    warn!("Abandoning stream to {} after {} events: {}", reply_subject, delivered, e);
                    return;
                }
                delivered += 1;
            }
            debug!("Stream to {} finished after {} events", reply_subject, delivered);
        }
    }
}

#[async_trait::async_trait]
impl Transport for NatsTransport {
    async fn start(&self) -> Result<()> {
        self.connect().await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut client_guard = self.client.lock().await;
        if let Some(client) = client_guard.take() {
            // Push out anything still buffered before dropping the connection
            if let Err(e) = client.flush().await {
                warn!("Failed to flush NATS connection: {}", e);
            }
            info!("Closed NATS connection");
        }
        Ok(())
    }

    async fn run(&self, handler: Arc<dyn RequestHandler>) -> Result<()> {
        let client = self.connect().await?;
        let subject = Subject::from(self.subject.clone());

        info!("Subscribing to {}", self.subject);
        let mut subscription = client
            .subscribe(subject)
            .await
            .with_context(|| format!("Failed to subscribe to {}", self.subject))?;

        while let Some(msg) = subscription.next().await {
            let reply_subject = match msg.reply {
                Some(subject) => subject.to_string(),
                None => {
                    debug!("Received message without reply subject, skipping");
                    continue;
                }
            };

            let request: JsonRpcRequest = match serde_json::from_slice(&msg.payload) {
                Ok(req) => req,
                Err(e) => {
                    error!("Failed to parse JSON-RPC request: {}", e);

                    let error_response = create_error_response(
                        "null".to_string(),
                        PARSE_ERROR,
                        "Parse error".to_string(),
                        Some(json!({ "error": e.to_string() })),
                    );
                    if let Err(e) = publish_response(&client, &reply_subject, &error_response).await {
                        error!("Failed to send error response: {}", e);
                    }

                    continue;
                }
            };

            debug!("Handling {} (request {})", request.method, request.id);
            let client = client.clone();
            let handler = handler.clone();

            tokio::spawn(async move {
                let request_id = request.id.clone();

                let reply = match handler.handle(request).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        error!("Error handling request: {}", e);
                        Reply::Single(create_error_response(
                            request_id,
                            INTERNAL_ERROR,
                            "Internal error".to_string(),
                            Some(json!({ "error": e.to_string() })),
                        ))
                    }
                };

                deliver(&client, &reply_subject, reply).await;
            });
        }

        Ok(())
    }
}

/// Factory for creating NatsTransport instances
pub struct NatsTransportFactory {
    url: String,
    subject: String,
    connect_timeout: Duration,
}

impl NatsTransportFactory {
    /// Create a new NatsTransportFactory
    pub fn new(url: &str, subject: &str, connect_timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            subject: subject.to_string(),
            connect_timeout,
        }
    }
}

impl crate::transport::TransportFactory for NatsTransportFactory {
    fn create(&self) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(NatsTransport::new(
            &self.url,
            &self.subject,
            self.connect_timeout,
        )))
    }
}
