//! In-process broker.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::service::{Delivery, TaskConsumer, VisitQueue};
use crate::domain::visit_event::TaskMessage;
use crate::error::{EnqueueError, QueueError};

/// A broker that lives inside one process.
///
/// Same contract as the Redis broker: messages are stored serialized, dequeued
/// messages stay in flight until acknowledged, and [`Self::redeliver_unacked`]
/// simulates a worker crash by handing in-flight messages back.
///
/// Clones share the same queue, so one clone can be given to the producer and
/// one to each consuming thread.
///
/// # Use Cases
///
/// - Integration tests of the redirect → worker pipeline
/// - Local development without Redis
#[derive(Clone, Default)]
pub struct MemoryQueue {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    available: Condvar,
}

#[derive(Default)]
struct State {
    ready: VecDeque<String>,
    in_flight: Vec<String>,
    failed: Vec<(String, String)>,
    closed: bool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        debug!("Using in-memory broker");
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Pushes a raw payload, bypassing serialization.
    pub fn push_raw(&self, raw: impl Into<String>) {
        self.lock().ready.push_back(raw.into());
        self.shared.available.notify_one();
    }

    /// Messages waiting to be dequeued, oldest first.
    pub fn pending(&self) -> Vec<TaskMessage> {
        self.lock()
            .ready
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect()
    }

    /// Number of messages waiting to be dequeued.
    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of dequeued, unacknowledged messages.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Failed messages with their failure reasons.
    pub fn failed(&self) -> Vec<(String, String)> {
        self.lock().failed.clone()
    }

    /// Hands every in-flight message back to the queue.
    pub fn redeliver_unacked(&self) -> usize {
        let mut state = self.lock();
        let moved = std::mem::take(&mut state.in_flight);
        let count = moved.len();
        for raw in moved.into_iter().rev() {
            state.ready.push_front(raw);
        }
        drop(state);

        self.shared.available.notify_all();
        count
    }

    /// Stops accepting new messages.
    pub fn close(&self) {
        self.lock().closed = true;
        self.shared.available.notify_all();
    }

    fn take_in_flight(state: &mut State, raw: &str) -> bool {
        match state.in_flight.iter().position(|m| m == raw) {
            Some(index) => {
                state.in_flight.swap_remove(index);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl VisitQueue for MemoryQueue {
    async fn enqueue(&self, message: TaskMessage) -> Result<(), EnqueueError> {
        let raw = serde_json::to_string(&message)?;

        let mut state = self.lock();
        if state.closed {
            return Err(EnqueueError::Closed);
        }
        state.ready.push_back(raw);
        drop(state);

        self.shared.available.notify_one();
        Ok(())
    }

    async fn health_check(&self) -> bool {
        !self.lock().closed
    }
}

impl TaskConsumer for MemoryQueue {
    fn dequeue(&mut self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let state = self.lock();
        let (mut state, _) = self
            .shared
            .available
            .wait_timeout_while(state, wait, |s| s.ready.is_empty() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);

        let Some(raw) = state.ready.pop_front() else {
            return Ok(None);
        };

        match serde_json::from_str::<TaskMessage>(&raw) {
            Ok(message) => {
                state.in_flight.push(raw.clone());
                Ok(Some(Delivery::new(message, raw)))
            }
            Err(e) => {
                state
                    .failed
                    .push((raw, format!("malformed task message: {e}")));
                Err(QueueError::Malformed(e))
            }
        }
    }

    fn ack(&mut self, delivery: &Delivery) -> Result<(), QueueError> {
        Self::take_in_flight(&mut self.lock(), delivery.raw());
        Ok(())
    }

    fn fail(&mut self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let mut state = self.lock();
        Self::take_in_flight(&mut state, delivery.raw());
        state
            .failed
            .push((delivery.raw().to_string(), reason.to_string()));
        Ok(())
    }

    fn recover(&mut self) -> Result<usize, QueueError> {
        Ok(self.redeliver_unacked())
    }
}
