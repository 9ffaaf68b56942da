use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use tokio::sync::{Mutex, RwLock};

use crate::error::{TaskManagerError, TaskResult, INTERNAL_ERROR};
use crate::publisher::{EventSubscription, StartFrom, Subscribers, DEFAULT_SUBSCRIBER_CAPACITY};
use crate::types::{Message, Task, TaskError, TaskEvent, TaskEventKind, TaskState};

struct TaskEntry {
    task: Task,
    subscribers: Subscribers,
}

impl TaskEntry {
    /// State the task would be in after `kind`, or the reason it is refused.
    fn next_state(&self, current: TaskState, kind: &TaskEventKind) -> TaskResult<TaskState> {
        match kind {
            TaskEventKind::StatusUpdate { state, .. } => {
                if current.can_transition_to(*state) {
                    Ok(*state)
                } else {
                    Err(TaskManagerError::conflict(&self.task.id, current, "transition"))
                }
            }
            TaskEventKind::ArtifactUpdate { .. } => {
                if current == TaskState::Working {
                    Ok(current)
                } else {
                    Err(TaskManagerError::conflict(&self.task.id, current, "append an artifact to"))
                }
            }
        }
    }

    /// Apply `kind`, append it to history and hand it to subscribers.
    fn record(&mut self, kind: TaskEventKind) -> TaskEvent {
        let now = Utc::now();
        let mut is_final = false;

        match &kind {
            TaskEventKind::StatusUpdate { state, message } => {
                self.task.state = *state;
                is_final = state.is_terminal() || *state == TaskState::InputRequired;
                if *state == TaskState::Failed {
                    self.task.error = Some(TaskError {
                        code: INTERNAL_ERROR,
                        message: message
                            .as_ref()
                            .map(Message::text)
                            .unwrap_or_else(|| "Task failed".to_string()),
                        data: None,
                    });
                }
            }
            TaskEventKind::ArtifactUpdate { artifact } => {
                if artifact.last_chunk {
                    self.task.artifact = Some(artifact.clone());
                }
            }
        }

        let event = TaskEvent {
            task_id: self.task.id.clone(),
            sequence: self.task.history.len() as u64,
            timestamp: now,
            kind,
            is_final,
        };
        self.task.history.push(event.clone());
        self.task.updated_at = now;

        self.subscribers.broadcast(&event);
        if event.is_terminal() {
            self.subscribers.close();
        }

        event
    }
}

/// In-memory registry of tasks, the single source of truth for task state.
///
/// Mutations of one task are serialized by that task's own lock; tasks with
/// different identifiers never contend beyond the brief registry lookup.
pub struct TaskStore {
    tasks: RwLock<HashMap<String, Arc<Mutex<TaskEntry>>>>,
    subscriber_capacity: usize,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    pub fn new() -> Self {
        Self::with_subscriber_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Create a store whose subscribers each buffer at most `capacity` events
    pub fn with_subscriber_capacity(capacity: usize) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            subscriber_capacity: capacity,
        }
    }

    async fn entry(&self, task_id: &str) -> TaskResult<Arc<Mutex<TaskEntry>>> {
        let tasks = self.tasks.read().await;
        tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| TaskManagerError::not_found(task_id))
    }

    /// Register a new task in `submitted` state
    pub async fn create(
        &self,
        task_id: &str,
        session_id: Option<String>,
        input: Message,
    ) -> TaskResult<Task> {
        let mut tasks = self.tasks.write().await;

        if let Some(existing) = tasks.get(task_id) {
            let state = existing.lock().await.task.state;
            return Err(TaskManagerError::conflict(task_id, state, "create"));
        }

        let now = Utc::now();
        let mut entry = TaskEntry {
            task: Task {
                id: task_id.to_string(),
                session_id,
                state: TaskState::Submitted,
                inputs: vec![input],
                history: Vec::new(),
                artifact: None,
                error: None,
                created_at: now,
                updated_at: now,
            },
            subscribers: Subscribers::new(task_id, self.subscriber_capacity),
        };
        entry.record(TaskEventKind::status(TaskState::Submitted));

        let task = entry.task.clone();
        tasks.insert(task_id.to_string(), Arc::new(Mutex::new(entry)));

        info!("Created task {}", task_id);
        Ok(task)
    }

    /// Snapshot of a task
    pub async fn get(&self, task_id: &str) -> TaskResult<Task> {
        let entry = self.entry(task_id).await?;
        let entry = entry.lock().await;
        Ok(entry.task.clone())
    }

    /// Atomically apply one event to a task and publish it
    pub async fn append_event(&self, task_id: &str, kind: TaskEventKind) -> TaskResult<TaskEvent> {
        let mut events = self.append_events(task_id, vec![kind]).await?;
        events
            .pop()
            .ok_or_else(|| TaskManagerError::not_found(task_id))
    }

    /// Apply several events as one step: either all are recorded, in order,
    /// or the task is left untouched.
    pub async fn append_events(
        &self,
        task_id: &str,
        kinds: Vec<TaskEventKind>,
    ) -> TaskResult<Vec<TaskEvent>> {
        let entry = self.entry(task_id).await?;
        let mut entry = entry.lock().await;

        let mut state = entry.task.state;
        for kind in &kinds {
            state = entry.next_state(state, kind)?;
        }

        let events: Vec<TaskEvent> = kinds.into_iter().map(|kind| entry.record(kind)).collect();
        debug!(
            "Task {} now {} with {} events",
            task_id,
            entry.task.state,
            entry.task.history.len()
        );
        Ok(events)
    }

    /// Record input supplied for an `input-required` task and move it back
    /// to `working`
    pub async fn resume(&self, task_id: &str, message: Message) -> TaskResult<TaskEvent> {
        let entry = self.entry(task_id).await?;
        let mut entry = entry.lock().await;

        if entry.task.state != TaskState::InputRequired {
            return Err(TaskManagerError::conflict(task_id, entry.task.state, "resume"));
        }

        entry.task.inputs.push(message);
        Ok(entry.record(TaskEventKind::status(TaskState::Working)))
    }

    /// Attach a subscriber to a task's event feed.
    ///
    /// The history snapshot and the live queue are taken under the same lock,
    /// so nothing is missed or seen twice between them. Only a task the agent
    /// is driving gets a live queue; any other subscription ends with its
    /// history.
    pub async fn subscribe(&self, task_id: &str, from: StartFrom) -> TaskResult<EventSubscription> {
        let entry = self.entry(task_id).await?;
        let mut entry = entry.lock().await;

        let first = usize::try_from(from.first_sequence()).unwrap_or(usize::MAX);
        let backlog = entry.task.history.iter().skip(first).cloned().collect();
        let live = if entry.task.is_in_flight() {
            Some(entry.subscribers.attach())
        } else {
            None
        };

        Ok(EventSubscription::new(task_id, backlog, live))
    }

    /// Evict a task, closing any live subscriptions
    pub async fn remove(&self, task_id: &str) -> TaskResult<Task> {
        let entry = {
            let mut tasks = self.tasks.write().await;
            tasks
                .remove(task_id)
                .ok_or_else(|| TaskManagerError::not_found(task_id))?
        };

        let mut entry = entry.lock().await;
        entry.subscribers.close();

        info!("Evicted task {}", task_id);
        Ok(entry.task.clone())
    }

    /// All tasks threaded under `session_id`, oldest first
    pub async fn list_by_session(&self, session_id: &str) -> Vec<Task> {
        let entries: Vec<Arc<Mutex<TaskEntry>>> = {
            let tasks = self.tasks.read().await;
            tasks.values().cloned().collect()
        };

        let mut matching = Vec::new();
        for entry in entries {
            let entry = entry.lock().await;
            if entry.task.session_id.as_deref() == Some(session_id) {
                matching.push(entry.task.clone());
            }
        }

        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        matching
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Artifact, Part};
    use futures::StreamExt;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    async fn working_task(store: &TaskStore, task_id: &str) {
        assert_ok!(store.create(task_id, None, Message::user_text("ping")).await);
        assert_ok!(store.append_event(task_id, TaskEventKind::status(TaskState::Working)).await);
    }

    #[tokio::test]
    async fn test_create_records_submitted_event() {
        let store = TaskStore::new();
        let task = store
            .create("t1", Some("s1".to_string()), Message::user_text("ping"))
            .await
            .unwrap();

        assert_eq!(task.state, TaskState::Submitted);
        assert_eq!(task.history.len(), 1);
        assert_eq!(task.history[0].state(), Some(TaskState::Submitted));
        assert_eq!(task.inputs[0].text(), "ping");
    }

    #[tokio::test]
    async fn test_create_existing_task_conflicts() {
        let store = TaskStore::new();
        working_task(&store, "t1").await;

        let err = store.create("t1", None, Message::user_text("again")).await.unwrap_err();
        assert!(matches!(
            err,
            TaskManagerError::Conflict { state: TaskState::Working, .. }
        ));

        let task = store.get("t1").await.unwrap();
        assert_eq!(task.inputs.len(), 1);
        assert_eq!(task.history.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let store = TaskStore::new();

        assert!(matches!(store.get("nope").await, Err(TaskManagerError::NotFound { .. })));
        assert!(matches!(
            store.append_event("nope", TaskEventKind::status(TaskState::Working)).await,
            Err(TaskManagerError::NotFound { .. })
        ));
        assert!(matches!(
            store.subscribe("nope", StartFrom::Beginning).await,
            Err(TaskManagerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_terminal_task_rejects_further_events() {
        let store = TaskStore::new();
        working_task(&store, "t1").await;
        assert_ok!(store.append_event("t1", TaskEventKind::status(TaskState::Canceled)).await);
        let before = store.get("t1").await.unwrap();

        assert_err!(store.append_event("t1", TaskEventKind::status(TaskState::Completed)).await);
        assert_err!(
            store
                .append_event("t1", TaskEventKind::artifact(Artifact::last(vec![Part::text("late")])))
                .await
        );

        assert_eq!(store.get("t1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_append_events_is_all_or_nothing() {
        let store = TaskStore::new();
        assert_ok!(store.create("t1", None, Message::user_text("ping")).await);

        // Artifacts are refused before the task is working.
        let result = store
            .append_events(
                "t1",
                vec![
                    TaskEventKind::artifact(Artifact::last(vec![Part::text("pong")])),
                    TaskEventKind::status(TaskState::Completed),
                ],
            )
            .await;
        assert!(matches!(result, Err(TaskManagerError::Conflict { .. })));

        let task = store.get("t1").await.unwrap();
        assert_eq!(task.state, TaskState::Submitted);
        assert_eq!(task.history.len(), 1);
        assert!(task.artifact.is_none());
    }

    #[tokio::test]
    async fn test_history_sequence_is_strictly_increasing() {
        let store = TaskStore::new();
        working_task(&store, "t1").await;
        for text in ["a", "ab"] {
            assert_ok!(
                store
                    .append_event("t1", TaskEventKind::artifact(Artifact::partial(vec![Part::text(text)])))
                    .await
            );
        }

        let task = store.get("t1").await.unwrap();
        let sequences: Vec<u64> = task.history.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
        // Partial chunks are not the task's artifact.
        assert!(task.artifact.is_none());
    }

    #[tokio::test]
    async fn test_failed_status_sets_task_error() {
        let store = TaskStore::new();
        working_task(&store, "t1").await;
        assert_ok!(
            store
                .append_event(
                    "t1",
                    TaskEventKind::status_with_message(TaskState::Failed, Message::agent_text("boom")),
                )
                .await
        );

        let task = store.get("t1").await.unwrap();
        assert_eq!(task.error.map(|e| e.message), Some("boom".to_string()));
    }

    #[tokio::test]
    async fn test_subscription_sees_history_then_live_events() {
        let store = TaskStore::new();
        working_task(&store, "t1").await;

        let subscription = store.subscribe("t1", StartFrom::Beginning).await.unwrap();
        assert_ok!(
            store
                .append_events(
                    "t1",
                    vec![
                        TaskEventKind::artifact(Artifact::last(vec![Part::text("pong")])),
                        TaskEventKind::status(TaskState::Completed),
                    ],
                )
                .await
        );

        let events: Vec<TaskEvent> = subscription.collect().await;
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_resume_requires_input_required_state() {
        let store = TaskStore::new();
        working_task(&store, "t1").await;

        assert!(matches!(
            store.resume("t1", Message::user_text("more")).await,
            Err(TaskManagerError::Conflict { operation: "resume", .. })
        ));

        assert_ok!(
            store
                .append_event(
                    "t1",
                    TaskEventKind::status_with_message(TaskState::InputRequired, Message::agent_text("which city?")),
                )
                .await
        );
        let event = store.resume("t1", Message::user_text("Paris")).await.unwrap();
        assert_eq!(event.state(), Some(TaskState::Working));

        let task = store.get("t1").await.unwrap();
        assert_eq!(task.inputs.len(), 2);
        assert_eq!(task.inputs[1].text(), "Paris");
    }

    #[tokio::test]
    async fn test_subscription_to_waiting_task_ends_with_history() {
        let store = TaskStore::new();
        working_task(&store, "t1").await;
        assert_ok!(
            store
                .append_event(
                    "t1",
                    TaskEventKind::status_with_message(TaskState::InputRequired, Message::agent_text("which city?")),
                )
                .await
        );

        let subscription = store.subscribe("t1", StartFrom::Beginning).await.unwrap();
        let events = tokio::time::timeout(Duration::from_secs(1), subscription.collect::<Vec<_>>())
            .await
            .expect("subscription to an input-required task should end");
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].state(), Some(TaskState::InputRequired));
    }

    #[tokio::test]
    async fn test_subscription_from_sequence_skips_earlier_history() {
        let store = TaskStore::new();
        working_task(&store, "t1").await;

        let subscription = store.subscribe("t1", StartFrom::Sequence(1)).await.unwrap();
        assert_ok!(store.append_event("t1", TaskEventKind::status(TaskState::Canceled)).await);

        let sequences: Vec<u64> = subscription.map(|e| e.sequence).collect().await;
        assert_eq!(sequences, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_remove_closes_subscribers() {
        let store = TaskStore::new();
        working_task(&store, "t1").await;
        let subscription = store.subscribe("t1", StartFrom::Sequence(2)).await.unwrap();

        let removed = store.remove("t1").await.unwrap();
        assert_eq!(removed.id, "t1");
        assert!(subscription.collect::<Vec<_>>().await.is_empty());
        assert!(matches!(store.get("t1").await, Err(TaskManagerError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_list_by_session() {
        let store = TaskStore::new();
        assert_ok!(store.create("a", Some("s1".to_string()), Message::user_text("1")).await);
        assert_ok!(store.create("b", Some("s2".to_string()), Message::user_text("2")).await);
        assert_ok!(store.create("c", Some("s1".to_string()), Message::user_text("3")).await);
        assert_ok!(store.create("d", None, Message::user_text("4")).await);

        let ids: Vec<String> = store.list_by_session("s1").await.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
        assert!(store.list_by_session("missing").await.is_empty());
    }
}
