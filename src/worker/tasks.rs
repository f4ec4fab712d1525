//! Task handlers run by worker threads.
//!
//! Handlers are plain blocking functions. Everything asynchronous goes through
//! [`WorkerContext::submit`].

use uuid::Uuid;

use super::context::WorkerContext;
use crate::application::services::VisitService;
use crate::domain::entities::Visit;
use crate::domain::visit_event::{RECORD_VISIT_TASK, TaskMessage, VisitEvent};
use crate::error::TaskError;

/// Result of one successful task invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Recorded(Visit),
    /// The delivery had already been recorded.
    Duplicate,
}

/// Per-process task settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskOptions {
    /// Record each broker delivery at most once.
    pub deduplicate: bool,
}

/// Routes a dequeued message to its handler.
///
/// # Errors
///
/// - [`TaskError::UnknownTask`] for an unregistered task name
/// - [`TaskError::Decode`] for a payload that is not a visit event
/// - anything [`record_visit`] returns
pub fn dispatch(
    context: &WorkerContext,
    message: &TaskMessage,
    options: TaskOptions,
) -> Result<TaskOutcome, TaskError> {
    match message.task.as_str() {
        RECORD_VISIT_TASK => {
            let event: VisitEvent = serde_json::from_value(message.payload.clone())?;
            let delivery_id = options.deduplicate.then_some(message.id);
            record_visit(context, event, delivery_id)
        }
        other => Err(TaskError::UnknownTask(other.to_string())),
    }
}

/// Persists one visit through the worker context.
///
/// With a `delivery_id` the insert is skipped when that delivery was already
/// recorded. Without one every call inserts a row.
///
/// # Errors
///
/// - [`TaskError::Lifecycle`] if the context is not running; the message must be
///   left unacknowledged
/// - [`TaskError::Persistence`] if the insert fails
/// - [`TaskError::TimedOut`] if the insert exceeds the persist timeout
pub fn record_visit(
    context: &WorkerContext,
    event: VisitEvent,
    delivery_id: Option<Uuid>,
) -> Result<TaskOutcome, TaskError> {
    context.submit(move |visits| async move {
        let service = VisitService::new(visits);
        let outcome = match delivery_id {
            None => TaskOutcome::Recorded(service.persist(event).await?),
            Some(delivery_id) => match service.persist_once(event, delivery_id).await? {
                Some(visit) => TaskOutcome::Recorded(visit),
                None => TaskOutcome::Duplicate,
            },
        };
        Ok::<_, TaskError>(outcome)
    })
}
