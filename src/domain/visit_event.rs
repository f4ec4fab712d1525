//! Visit event model and the task envelope it travels in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::entities::NewVisit;

/// Task name shared by the redirect producer and the worker.
pub const RECORD_VISIT_TASK: &str = "visits.record";

/// A redirect occurrence queued for asynchronous persistence.
///
/// Serialized as `{"short_url_id", "ip_address", "user_agent"}`, with the id in
/// hyphenated UUID form.
///
/// # Usage Flow
///
/// 1. Built by [`crate::application::services::RedirectService`] after a hit
/// 2. Wrapped in a [`TaskMessage`] and pushed to the broker
/// 3. Dequeued by a worker thread and run through [`crate::worker::tasks::dispatch`]
/// 4. Converted to [`NewVisit`] for persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitEvent {
    pub short_url_id: Uuid,
    pub ip_address: String,
    pub user_agent: String,
}

impl VisitEvent {
    pub fn new(short_url_id: Uuid, ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            short_url_id,
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Deduplication key for one delivery of this event.
    ///
    /// Hex-encoded SHA-256 of `short_url_id:delivery_id`. Redeliveries of the same
    /// message carry the same `delivery_id` and therefore the same key.
    pub fn dedup_key(&self, delivery_id: Uuid) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.short_url_id.as_bytes());
        hasher.update(b":");
        hasher.update(delivery_id.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl From<VisitEvent> for NewVisit {
    fn from(event: VisitEvent) -> Self {
        Self {
            short_url_id: event.short_url_id,
            ip_address: event.ip_address,
            user_agent: event.user_agent,
        }
    }
}

/// Broker envelope around a task payload.
///
/// `id` is assigned once by the producer and survives redelivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: Uuid,
    pub task: String,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskMessage {
    /// Wraps a visit event under [`RECORD_VISIT_TASK`].
    pub fn record_visit(event: &VisitEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            task: RECORD_VISIT_TASK.to_string(),
            payload: serde_json::to_value(event)?,
            enqueued_at: Utc::now(),
        })
    }
}
