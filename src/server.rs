// src/server.rs

use std::sync::Arc;
use anyhow::Result;
use async_trait::async_trait;
use futures::{stream, StreamExt};
use log::{error, info};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::runtime::Runtime;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::error::{TaskManagerError, TaskResult, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND};
use crate::publisher::EventSubscription;
use crate::task_manager::TaskManager;
use crate::transport::{Reply, RequestHandler, Transport};
use crate::types::{
    create_error_response, create_response, JsonRpcRequest, JsonRpcResponse, SessionParams,
    Task, TaskIdParams, TaskSendParams, TaskState,
};

/// Maps A2A JSON-RPC methods onto task manager operations
pub struct A2aHandler {
    task_manager: TaskManager,
}

impl A2aHandler {
    pub fn new(task_manager: TaskManager) -> Self {
        Self { task_manager }
    }

    pub fn task_manager(&self) -> &TaskManager {
        &self.task_manager
    }

    /// Handle one request. Failures become JSON-RPC error responses.
    pub async fn dispatch(&self, request: JsonRpcRequest) -> Reply {
        match self.route(&request).await {
            Ok(reply) => reply,
            Err(response) => Reply::Single(response),
        }
    }

    async fn route(&self, request: &JsonRpcRequest) -> Result<Reply, JsonRpcResponse> {
        let id = &request.id;

        match request.method.as_str() {
            "agents/getInfo" => Ok(single(id, json!({ "agent": self.task_manager.agent() }))),
            "tasks/send" => {
                let params: TaskSendParams = parse_params(request)?;
                let task = self.send(params).await.map_err(|e| error_response(id, &e))?;
                Ok(single(id, json!({ "task": task })))
            }
            "tasks/sendSubscribe" => {
                let params: TaskSendParams = parse_params(request)?;
                let subscription = self.send_subscribe(params).await.map_err(|e| error_response(id, &e))?;
                Ok(event_feed(id, subscription))
            }
            "tasks/resubscribe" => {
                let params: TaskIdParams = parse_params(request)?;
                let subscription = self
                    .task_manager
                    .resubscribe(&params.task_id)
                    .await
                    .map_err(|e| error_response(id, &e))?;
                Ok(event_feed(id, subscription))
            }
            "tasks/get" => {
                let params: TaskIdParams = parse_params(request)?;
                let task = self
                    .task_manager
                    .get(&params.task_id)
                    .await
                    .map_err(|e| error_response(id, &e))?;
                Ok(single(id, json!({ "task": task })))
            }
            "tasks/cancel" => {
                let params: TaskIdParams = parse_params(request)?;
                let task = self
                    .task_manager
                    .cancel(&params.task_id)
                    .await
                    .map_err(|e| error_response(id, &e))?;
                Ok(single(id, json!({ "task": task })))
            }
            "tasks/list" => {
                let params: SessionParams = parse_params(request)?;
                let tasks = self.task_manager.list_by_session(&params.session_id).await;
                Ok(single(id, json!({ "tasks": tasks })))
            }
            method => Err(create_error_response(
                id.clone(),
                METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
                None,
            )),
        }
    }

    /// Sending to a task that is waiting for input resumes it; anything else
    /// is a new submission.
    async fn send(&self, params: TaskSendParams) -> TaskResult<Task> {
        if self.awaiting_input(&params.task_id).await {
            return self
                .task_manager
                .provide_input(&params.task_id, params.message)
                .await;
        }
        self.task_manager.submit(params).await
    }

    async fn send_subscribe(&self, params: TaskSendParams) -> TaskResult<EventSubscription> {
        if self.awaiting_input(&params.task_id).await {
            return self
                .task_manager
                .provide_input_streaming(&params.task_id, params.message)
                .await;
        }
        self.task_manager.submit_streaming(params).await
    }

    async fn awaiting_input(&self, task_id: &str) -> bool {
        matches!(
            self.task_manager.get(task_id).await,
            Ok(task) if task.state == TaskState::InputRequired
        )
    }
}

#[async_trait]
impl RequestHandler for A2aHandler {
    async fn handle(&self, request: JsonRpcRequest) -> Result<Reply> {
        Ok(self.dispatch(request).await)
    }
}

fn single(id: &str, result: serde_json::Value) -> Reply {
    Reply::Single(create_response(id.to_string(), result))
}

/// One response per event. A subscriber dropped for lagging gets a closing
/// error telling it to resubscribe.
fn event_feed(id: &str, subscription: EventSubscription) -> Reply {
    let id = id.to_string();
    Reply::Stream(
        stream::unfold(Some(subscription), move |subscription| {
            let id = id.clone();
            async move {
                let mut subscription = subscription?;
                match subscription.next().await {
                    Some(event) => Some((create_response(id, json!(event)), Some(subscription))),
                    None if subscription.abandoned() => {
                        let message = format!(
                            "Fell behind the events of task {}; resubscribe to continue",
                            subscription.task_id()
                        );
                        Some((create_error_response(id, INTERNAL_ERROR, message, None), None))
                    }
                    None => None,
                }
            }
        })
        .boxed(),
    )
}

fn error_response(id: &str, error: &TaskManagerError) -> JsonRpcResponse {
    create_error_response(id.to_string(), error.rpc_code(), error.to_string(), None)
}

fn parse_params<T: DeserializeOwned>(request: &JsonRpcRequest) -> Result<T, JsonRpcResponse> {
    serde_json::from_value(request.params.clone()).map_err(|e| {
        create_error_response(
            request.id.clone(),
            INVALID_PARAMS,
            format!("Invalid params for {}: {}", request.method, e),
            None,
        )
    })
}

/// Server for handling A2A requests
pub struct Server {
    handler: Arc<A2aHandler>,
    transport: Arc<dyn Transport>,
    runtime: Runtime,
    shutdown: CancellationToken,
}

impl Server {
    /// Create a new Server instance
    pub(crate) fn new(
        task_manager: TaskManager,
        transport: Arc<dyn Transport>,
        runtime: Runtime,
    ) -> Self {
        Self {
            handler: Arc::new(A2aHandler::new(task_manager)),
            transport,
            runtime,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn task_manager(&self) -> &TaskManager {
        self.handler.task_manager()
    }

    /// Token that stops `run_until_shutdown` when cancelled
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the server until shutdown signal is received
    pub fn run_until_shutdown(self) -> Result<()> {
        self.runtime.block_on(async {
            // Start the transport
            self.transport.start().await?;

            let handler: Arc<dyn RequestHandler> = self.handler.clone();
            let transport = self.transport.clone();

            let transport_handle = tokio::spawn(async move {
                if let Err(e) = transport.run(handler).await {
                    error!("Transport error: {}", e);
                }
            });

            // Wait for shutdown signal
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down...");
                }
                _ = self.shutdown.cancelled() => {
                    info!("Received shutdown signal, shutting down...");
                }
            }

            transport_handle.abort();

            if let Err(e) = self.transport.stop().await {
                error!("Error stopping transport: {}", e);
            }

            info!("Server shutdown complete");

            Ok::<_, anyhow::Error>(())
        })?;

        Ok(())
    }
}
