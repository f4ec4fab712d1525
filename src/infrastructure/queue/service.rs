//! Broker contract for visit messages.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::visit_event::TaskMessage;
use crate::error::{EnqueueError, QueueError};

/// Producer side of the broker, used on the redirect path.
///
/// # Implementations
///
/// - [`crate::infrastructure::queue::RedisVisitQueue`] - Redis list producer
/// - [`crate::infrastructure::queue::MemoryQueue`] - In-process broker
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VisitQueue: Send + Sync {
    /// Hands one message to the broker.
    ///
    /// Returns once the broker has accepted the message; processing happens later
    /// in a worker.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError`] if the broker is unreachable or closed.
    async fn enqueue(&self, message: TaskMessage) -> Result<(), EnqueueError>;

    /// Checks if the broker is reachable.
    async fn health_check(&self) -> bool;
}

/// A dequeued message that has not been acknowledged yet.
///
/// Keeps the raw payload so the broker can locate the in-flight copy on ack.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: TaskMessage,
    raw: String,
}

impl Delivery {
    pub fn new(message: TaskMessage, raw: String) -> Self {
        Self { message, raw }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Consumer side of the broker, used by worker task threads.
///
/// Blocking by design: each task-execution thread owns one consumer. Delivery is
/// at-least-once: a message stays in flight until [`Self::ack`] or [`Self::fail`],
/// and [`Self::recover`] hands in-flight messages of a crashed worker back to the
/// queue.
pub trait TaskConsumer: Send {
    /// Waits up to `wait` for the next message and marks it in flight.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Malformed`] for a message that cannot be decoded; the
    /// broker records it as failed before returning.
    fn dequeue(&mut self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Removes a processed message from the in-flight set.
    fn ack(&mut self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Removes a message from the in-flight set and records it as failed.
    fn fail(&mut self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;

    /// Moves every in-flight message back to the queue, returning how many moved.
    fn recover(&mut self) -> Result<usize, QueueError>;
}
