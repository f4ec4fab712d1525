//! Broker for visit messages.
//!
//! Provides the [`VisitQueue`] producer trait and [`TaskConsumer`] consumer trait
//! with two implementations:
//! - [`RedisVisitQueue`] / [`RedisTaskConsumer`] - Production Redis lists
//! - [`MemoryQueue`] - In-process broker for tests and local runs

mod memory_queue;
mod redis_queue;
mod service;

pub use memory_queue::MemoryQueue;
pub use redis_queue::{QueueKeys, RedisTaskConsumer, RedisVisitQueue};
pub use service::{Delivery, TaskConsumer, VisitQueue};

#[cfg(test)]
pub use service::MockVisitQueue;
