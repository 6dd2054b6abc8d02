use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use crate::domain::DeliveryId;
use crate::domain::ports::{DeliveryTask, QueueError, WorkQueue};

pub const DEFAULT_LANE: &str = "webhooks";

/// In-memory work queue for webhook deliveries
///
/// Tasks enqueued with a `not_before` stay invisible to consumers until that
/// instant. The queue never retries on its own: a task handed out by
/// [`WorkQueue::dequeue`] is gone, and re-attempts are scheduled by the sweep.
#[derive(Debug)]
pub struct DeliveryQueue {
    lane: String,

    state: Mutex<QueueState>,

    /// Wakes consumers on enqueue and on close.
    notify: Notify,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<DeliveryTask>,

    delayed: BinaryHeap<Delayed>,

    /// Insertion counter keeping delayed tasks with equal deadlines FIFO.
    sequence: u64,

    closed: bool,
}

#[derive(Debug, PartialEq, Eq)]
struct Delayed {
    at: OffsetDateTime,
    sequence: u64,
    task: DeliveryTask,
}

// Reversed so the max-heap pops the earliest deadline first.
impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl QueueState {
    /// Move every delayed task whose deadline has passed to the ready list.
    fn promote_due(&mut self, now: OffsetDateTime) {
        while self.delayed.peek().is_some_and(|d| d.at <= now) {
            if let Some(delayed) = self.delayed.pop() {
                self.ready.push_back(delayed.task);
            }
        }
    }
}

impl DeliveryQueue {
    /// Create a delivery queue on the default `webhooks` lane
    pub fn new() -> Self {
        Self::with_lane(DEFAULT_LANE)
    }

    /// Create a queue on a named lane
    pub fn with_lane(lane: impl Into<String>) -> Self {
        Self {
            lane: lane.into(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Get queue size, delayed tasks included
    pub async fn size(&self) -> usize {
        let state = self.state.lock().await;
        state.ready.len() + state.delayed.len()
    }

    /// Check if queue is empty
    pub async fn is_empty(&self) -> bool {
        self.size().await == 0
    }

    /// Stop accepting work and release every waiting consumer.
    ///
    /// Tasks still queued are dropped; their records stay `pending` and are
    /// picked up by the recovery sweep.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        let dropped = state.ready.len() + state.delayed.len();
        state.ready.clear();
        state.delayed.clear();
        drop(state);

        self.notify.notify_waiters();
        info!(lane = %self.lane, dropped_count = dropped, "Closed delivery queue");
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for DeliveryQueue {
    fn lane(&self) -> &str {
        &self.lane
    }

    async fn enqueue(
        &self,
        delivery_id: DeliveryId,
        not_before: Option<OffsetDateTime>,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed(self.lane.clone()));
        }

        let task = DeliveryTask {
            delivery_id,
            not_before,
        };
        match not_before {
            Some(at) if at > OffsetDateTime::now_utc() => {
                state.sequence += 1;
                let sequence = state.sequence;
                state.delayed.push(Delayed { at, sequence, task });
            }
            _ => state.ready.push_back(task),
        }
        drop(state);

        debug!(lane = %self.lane, delivery_id = %delivery_id, "Enqueued delivery");
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self) -> Option<DeliveryTask> {
        loop {
            // Registered before inspecting the state so a concurrent enqueue is not missed.
            let notified = self.notify.notified();

            let wait = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return None;
                }

                let now = OffsetDateTime::now_utc();
                state.promote_due(now);

                if let Some(task) = state.ready.pop_front() {
                    debug!(lane = %self.lane, delivery_id = %task.delivery_id, "Dequeued delivery");
                    return Some(task);
                }

                state.delayed.peek().map(|d| {
                    std::time::Duration::try_from(d.at - now).unwrap_or(std::time::Duration::ZERO)
                })
            };

            match wait {
                Some(delay) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => notified.await,
            }
        }
    }
}
