use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::adapter::{modalities_compatible, AgentAdapter, AgentOutcome, AgentRequest, AgentUpdate};
use crate::error::{AdapterError, TaskManagerError, TaskResult};
use crate::publisher::{EventSubscription, StartFrom};
use crate::task_store::TaskStore;
use crate::types::{AgentCard, Artifact, Message, Part, Task, TaskEventKind, TaskSendParams, TaskState};

/// One adapter invocation in progress for a task
struct AgentRun {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct RunningTasks {
    next_id: u64,
    runs: HashMap<String, AgentRun>,
}

/// Drives tasks through their lifecycle on behalf of an agent adapter.
///
/// Cheap to clone; clones share the same store, adapter and in-flight runs.
#[derive(Clone)]
pub struct TaskManager {
    agent: Arc<AgentCard>,
    store: Arc<TaskStore>,
    adapter: Arc<dyn AgentAdapter>,
    running: Arc<Mutex<RunningTasks>>,
}

impl TaskManager {
    /// Create a new TaskManager
    pub fn new(agent: AgentCard, store: Arc<TaskStore>, adapter: Arc<dyn AgentAdapter>) -> Self {
        Self {
            agent: Arc::new(agent),
            store,
            adapter,
            running: Arc::new(Mutex::new(RunningTasks::default())),
        }
    }

    /// Get the agent card
    pub fn agent(&self) -> &AgentCard {
        &self.agent
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Get a task by ID
    pub async fn get(&self, task_id: &str) -> TaskResult<Task> {
        self.store.get(task_id).await
    }

    /// Tasks belonging to a session, oldest first
    pub async fn list_by_session(&self, session_id: &str) -> Vec<Task> {
        self.store.list_by_session(session_id).await
    }

    /// Create a task and run the adapter to its outcome
    pub async fn submit(&self, params: TaskSendParams) -> TaskResult<Task> {
        self.validate_output_modes(&params)?;

        let task = self
            .store
            .create(&params.task_id, params.session_id, params.message)
            .await?;
        let run = self.start_run(&task.id).await;

        if self.record(&task.id, vec![TaskEventKind::status(TaskState::Working)]).await {
            self.invoke(AgentRequest::from_task(&task), &run).await;
        }

        self.finish_run(&task.id, run.id).await;
        self.store.get(&task.id).await
    }

    /// Create a task and stream its events from the beginning of history.
    ///
    /// Creation errors are returned before any stream exists. The adapter's
    /// updates are consumed by a background driver.
    pub async fn submit_streaming(&self, params: TaskSendParams) -> TaskResult<EventSubscription> {
        self.validate_output_modes(&params)?;

        let task = self
            .store
            .create(&params.task_id, params.session_id, params.message)
            .await?;
        let subscription = self.store.subscribe(&task.id, StartFrom::Beginning).await?;
        let run = self.start_run(&task.id).await;

        if self.record(&task.id, vec![TaskEventKind::status(TaskState::Working)]).await {
            self.spawn_driver(AgentRequest::from_task(&task), run);
        } else {
            self.finish_run(&task.id, run.id).await;
        }

        Ok(subscription)
    }

    /// Supply the input an `input-required` task is waiting for and run the
    /// adapter again
    pub async fn provide_input(&self, task_id: &str, message: Message) -> TaskResult<Task> {
        self.store.resume(task_id, message).await?;
        info!("Resumed task {}", task_id);

        let run = self.start_run(task_id).await;
        if let Some(request) = self.resumed_request(task_id, &run).await {
            self.invoke(request, &run).await;
            self.finish_run(task_id, run.id).await;
        }

        self.store.get(task_id).await
    }

    /// Streaming variant of [`provide_input`](Self::provide_input); the
    /// stream starts with the event that resumes the task.
    pub async fn provide_input_streaming(
        &self,
        task_id: &str,
        message: Message,
    ) -> TaskResult<EventSubscription> {
        let resumed = self.store.resume(task_id, message).await?;
        info!("Resumed task {} with streaming", task_id);

        let subscription = self
            .store
            .subscribe(task_id, StartFrom::Sequence(resumed.sequence))
            .await?;
        let run = self.start_run(task_id).await;
        if let Some(request) = self.resumed_request(task_id, &run).await {
            self.spawn_driver(request, run);
        }

        Ok(subscription)
    }

    /// Attach a new consumer to a task's full event history and live feed
    pub async fn resubscribe(&self, task_id: &str) -> TaskResult<EventSubscription> {
        self.store.subscribe(task_id, StartFrom::Beginning).await
    }

    /// Cancel a task.
    ///
    /// The `canceled` event is recorded first and the adapter is signalled
    /// afterwards; whichever terminal transition reaches the store first wins.
    pub async fn cancel(&self, task_id: &str) -> TaskResult<Task> {
        let current = self.store.get(task_id).await?;
        if current.is_terminal() {
            return Err(TaskManagerError::conflict(task_id, current.state, "cancel"));
        }

        self.store
            .append_event(task_id, TaskEventKind::status(TaskState::Canceled))
            .await?;

        if let Some(run) = self.running.lock().await.runs.remove(task_id) {
            run.cancel.cancel();
        }

        info!("Canceled task {}", task_id);
        self.store.get(task_id).await
    }

    /// Administrative removal of a task from the store
    pub async fn evict(&self, task_id: &str) -> TaskResult<Task> {
        if let Some(run) = self.running.lock().await.runs.remove(task_id) {
            run.cancel.cancel();
        }
        self.store.remove(task_id).await
    }

    fn validate_output_modes(&self, params: &TaskSendParams) -> TaskResult<()> {
        let supported = self.adapter.supported_content_types();
        let accepted = params.accepted_output_modes.as_deref();

        if modalities_compatible(accepted, &supported) {
            return Ok(());
        }

        warn!(
            "Unsupported output mode for task {}. Received {:?}, support {:?}",
            params.task_id, accepted, supported
        );
        Err(TaskManagerError::IncompatibleContentTypes {
            requested: accepted.map(<[String]>::to_vec).unwrap_or_default(),
            supported,
        })
    }

    async fn start_run(&self, task_id: &str) -> AgentRun {
        let mut running = self.running.lock().await;
        running.next_id += 1;

        let run = AgentRun {
            id: running.next_id,
            cancel: CancellationToken::new(),
        };
        running.runs.insert(
            task_id.to_string(),
            AgentRun {
                id: run.id,
                cancel: run.cancel.clone(),
            },
        );
        run
    }

    /// Input for the run just registered for a resumed task.
    ///
    /// A cancel that lands between `resume` and `start_run` finds no token to
    /// fire, so the task is checked again once the run is registered. Returns
    /// None, and unregisters the run, if the task already ended.
    async fn resumed_request(&self, task_id: &str, run: &AgentRun) -> Option<AgentRequest> {
        match self.store.get(task_id).await {
            Ok(task) if !task.is_terminal() => Some(AgentRequest::from_task(&task)),
            _ => {
                debug!("Task {} ended before its agent run started", task_id);
                self.finish_run(task_id, run.id).await;
                None
            }
        }
    }

    async fn finish_run(&self, task_id: &str, run_id: u64) {
        let mut running = self.running.lock().await;
        if running.runs.get(task_id).map_or(false, |run| run.id == run_id) {
            running.runs.remove(task_id);
        }
    }

    /// Append events produced by the adapter.
    ///
    /// Returns false when the store refused them, which after a concurrent
    /// cancel or eviction means the adapter's output is discarded.
    async fn record(&self, task_id: &str, kinds: Vec<TaskEventKind>) -> bool {
        match self.store.append_events(task_id, kinds).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Discarding adapter output for task {}: {}", task_id, e);
                false
            }
        }
    }

    async fn invoke(&self, request: AgentRequest, run: &AgentRun) {
        let task_id = request.task_id.clone();
        let outcome = self.adapter.invoke(request, run.cancel.clone()).await;

        let kinds = match outcome {
            Ok(AgentOutcome::Completed(parts)) => completion_events(parts),
            Ok(AgentOutcome::InputRequired(prompt)) => input_required_events(prompt),
            Err(e) => failure_events(&task_id, e),
        };
        self.record(&task_id, kinds).await;
    }

    fn spawn_driver(&self, request: AgentRequest, run: AgentRun) {
        let manager = self.clone();
        tokio::spawn(async move {
            let task_id = request.task_id.clone();
            manager.drive_stream(request, &run).await;
            manager.finish_run(&task_id, run.id).await;
        });
    }

    /// Consume the adapter's updates one at a time, recording each before
    /// asking for the next.
    async fn drive_stream(&self, request: AgentRequest, run: &AgentRun) {
        let task_id = request.task_id.clone();
        let mut updates = self.adapter.clone().stream(request, run.cancel.clone());

        loop {
            let next = tokio::select! {
                biased;
                _ = run.cancel.cancelled() => {
                    debug!("Stopped consuming agent updates for task {}", task_id);
                    return;
                }
                next = updates.next() => next,
            };

            let (kinds, finished) = match next {
                Some(Ok(update)) => {
                    let finished = update.is_final();
                    (update_events(update), finished)
                }
                Some(Err(e)) => (failure_events(&task_id, e), true),
                None => {
                    let e = AdapterError::new("Agent stream ended without a final result");
                    (failure_events(&task_id, e), true)
                }
            };

            if !self.record(&task_id, kinds).await || finished {
                return;
            }
        }
    }
}

fn update_events(update: AgentUpdate) -> Vec<TaskEventKind> {
    match update {
        AgentUpdate::Working(note) => vec![TaskEventKind::status_with_message(
            TaskState::Working,
            Message::agent_text(note),
        )],
        AgentUpdate::Partial(parts) => vec![TaskEventKind::artifact(Artifact::partial(parts))],
        AgentUpdate::InputRequired(prompt) => input_required_events(prompt),
        AgentUpdate::Completed(parts) => completion_events(parts),
    }
}

fn completion_events(parts: Vec<Part>) -> Vec<TaskEventKind> {
    vec![
        TaskEventKind::artifact(Artifact::last(parts)),
        TaskEventKind::status(TaskState::Completed),
    ]
}

fn input_required_events(prompt: String) -> Vec<TaskEventKind> {
    vec![TaskEventKind::status_with_message(
        TaskState::InputRequired,
        Message::agent_text(prompt),
    )]
}

fn failure_events(task_id: &str, error: AdapterError) -> Vec<TaskEventKind> {
    warn!("Agent failed on task {}: {}", task_id, error);
    vec![TaskEventKind::status_with_message(
        TaskState::Failed,
        Message::agent_text(error.message),
    )]
}
