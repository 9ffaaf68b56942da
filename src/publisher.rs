//! Per-task fan-out of lifecycle events.
//!
//! Every task entry in the store owns a [`Subscribers`] list. Appending an
//! event to the task broadcasts it to each subscriber's bounded queue without
//! waiting, so neither the producer nor other subscribers are held up by a
//! slow reader. A subscriber whose queue is full is abandoned rather than
//! allowed to miss events; its stream ends, reports
//! [`abandoned`](EventSubscription::abandoned), and it may resubscribe.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use log::{debug, warn};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::types::TaskEvent;

/// Queue depth for each subscriber unless configured otherwise
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Where a new subscription starts reading a task's history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFrom {
    /// Replay the full recorded history.
    Beginning,
    /// Replay history from the event with this sequence number on.
    Sequence(u64),
}

impl StartFrom {
    pub(crate) fn first_sequence(self) -> u64 {
        match self {
            StartFrom::Beginning => 0,
            StartFrom::Sequence(sequence) => sequence,
        }
    }
}

struct Subscriber {
    sender: mpsc::Sender<TaskEvent>,
    lagged: Arc<AtomicBool>,
}

/// Live senders attached to a single task
pub(crate) struct Subscribers {
    task_id: String,
    capacity: usize,
    senders: Vec<Subscriber>,
}

impl Subscribers {
    pub(crate) fn new(task_id: &str, capacity: usize) -> Self {
        Self {
            task_id: task_id.to_string(),
            capacity: capacity.max(1),
            senders: Vec::new(),
        }
    }

    pub(crate) fn attach(&mut self) -> LiveFeed {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let lagged = Arc::new(AtomicBool::new(false));
        self.senders.push(Subscriber {
            sender,
            lagged: lagged.clone(),
        });
        LiveFeed { receiver, lagged }
    }

    pub(crate) fn broadcast(&mut self, event: &TaskEvent) {
        let task_id = &self.task_id;
        self.senders.retain(|subscriber| match subscriber.sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Subscriber to task {} lagged behind event {}, abandoning it",
                    task_id, event.sequence
                );
                subscriber.lagged.store(true, Ordering::Release);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Subscriber to task {} went away", task_id);
                false
            }
        });
    }

    /// Drop every sender, ending the live part of all subscriptions.
    pub(crate) fn close(&mut self) {
        self.senders.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.senders.len()
    }
}

/// Receiving half of one subscriber's queue
pub(crate) struct LiveFeed {
    receiver: mpsc::Receiver<TaskEvent>,
    lagged: Arc<AtomicBool>,
}

/// An ordered, gap-free view of one task's events.
///
/// Yields the history snapshot taken at subscription time, then live events
/// if the task was in flight. Ends after a live event marked `final`, when
/// the task is evicted, when the subscriber is abandoned for lagging, or right
/// after the snapshot if the task was not in flight.
pub struct EventSubscription {
    task_id: String,
    backlog: VecDeque<TaskEvent>,
    live: Option<mpsc::Receiver<TaskEvent>>,
    lagged: Arc<AtomicBool>,
}

impl EventSubscription {
    pub(crate) fn new(task_id: &str, backlog: Vec<TaskEvent>, live: Option<LiveFeed>) -> Self {
        let (live, lagged) = match live {
            Some(feed) => (Some(feed.receiver), feed.lagged),
            None => (None, Arc::new(AtomicBool::new(false))),
        };
        Self {
            task_id: task_id.to_string(),
            backlog: backlog.into(),
            live,
            lagged,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Whether the publisher dropped this subscriber for falling behind.
    ///
    /// Once the stream has ended this tells a lagging reader, which should
    /// resubscribe, apart from one whose task finished or was evicted.
    pub fn abandoned(&self) -> bool {
        self.lagged.load(Ordering::Acquire)
    }
}

impl Stream for EventSubscription {
    type Item = TaskEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<TaskEvent>> {
        let this = self.get_mut();

        if let Some(event) = this.backlog.pop_front() {
            return Poll::Ready(Some(event));
        }

        let Some(live) = this.live.as_mut() else {
            return Poll::Ready(None);
        };

        match live.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_final {
                    this.live = None;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                this.live = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TaskEventKind, TaskState};
    use chrono::Utc;
    use futures::StreamExt;

    fn status_event(sequence: u64, state: TaskState) -> TaskEvent {
        TaskEvent {
            task_id: "task-1".to_string(),
            sequence,
            timestamp: Utc::now(),
            kind: TaskEventKind::status(state),
            is_final: state.is_terminal() || state == TaskState::InputRequired,
        }
    }

    #[tokio::test]
    async fn test_backlog_then_live_until_final() {
        let mut subscribers = Subscribers::new("task-1", 8);
        let rx = subscribers.attach();
        let mut subscription =
            EventSubscription::new("task-1", vec![status_event(0, TaskState::Submitted)], Some(rx));

        subscribers.broadcast(&status_event(1, TaskState::Working));
        subscribers.broadcast(&status_event(2, TaskState::Completed));

        let sequences: Vec<u64> = (&mut subscription).map(|e| e.sequence).collect().await;
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(subscription.next().await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_only_subscription_ends_after_history() {
        let subscription = EventSubscription::new(
            "task-1",
            vec![status_event(0, TaskState::Submitted), status_event(1, TaskState::Canceled)],
            None,
        );

        let events: Vec<TaskEvent> = subscription.collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_terminal());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_abandoned_without_affecting_others() {
        let mut subscribers = Subscribers::new("task-1", 1);
        let slow = subscribers.attach();
        let mut fast = subscribers.attach();

        subscribers.broadcast(&status_event(0, TaskState::Submitted));
        assert_eq!(fast.receiver.recv().await.map(|e| e.sequence), Some(0));

        // `slow` never drained its single slot.
        subscribers.broadcast(&status_event(1, TaskState::Working));
        assert_eq!(subscribers.len(), 1);
        assert_eq!(fast.receiver.recv().await.map(|e| e.sequence), Some(1));

        let mut slow = EventSubscription::new("task-1", Vec::new(), Some(slow));
        let slow_events: Vec<u64> = (&mut slow).map(|e| e.sequence).collect().await;
        assert_eq!(slow_events, vec![0]);
        assert!(slow.abandoned());

        let fast = EventSubscription::new("task-1", Vec::new(), Some(fast));
        assert!(!fast.abandoned());
    }

    #[tokio::test]
    async fn test_closed_feed_is_not_abandoned() {
        let mut subscribers = Subscribers::new("task-1", 4);
        let feed = subscribers.attach();
        let mut subscription = EventSubscription::new("task-1", Vec::new(), Some(feed));

        subscribers.broadcast(&status_event(1, TaskState::Working));
        subscribers.close();

        let events: Vec<TaskEvent> = (&mut subscription).collect().await;
        assert_eq!(events.len(), 1);
        assert!(!subscription.abandoned());
    }

    #[test]
    fn test_start_from_first_sequence() {
        assert_eq!(StartFrom::Beginning.first_sequence(), 0);
        assert_eq!(StartFrom::Sequence(3).first_sequence(), 3);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let mut subscribers = Subscribers::new("task-1", 4);
        drop(subscribers.attach());

        subscribers.broadcast(&status_event(0, TaskState::Submitted));
        assert_eq!(subscribers.len(), 0);
    }
}
