//! Visit persistence service, run by worker tasks on the execution loop.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::entities::Visit;
use crate::domain::repositories::VisitRepository;
use crate::domain::visit_event::VisitEvent;
use crate::error::PersistenceError;

/// Service for turning visit events into stored visits.
///
/// Holds the worker process's engine; every call is one insert in its own
/// transaction.
pub struct VisitService<R: VisitRepository + ?Sized> {
    repository: Arc<R>,
}

impl<R: VisitRepository + ?Sized> VisitService<R> {
    /// Creates a new visit service.
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Records one visit for the event.
    ///
    /// Every call inserts a new row, so a redelivered event is recorded twice.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::UnknownShortUrl`] if the short link is gone.
    /// Returns [`PersistenceError::Database`] on any other database error.
    pub async fn persist(&self, event: VisitEvent) -> Result<Visit, PersistenceError> {
        self.repository.record(event.into()).await
    }

    /// Records the event at most once per broker delivery.
    ///
    /// Returns `Ok(None)` when the delivery was already recorded.
    pub async fn persist_once(
        &self,
        event: VisitEvent,
        delivery_id: Uuid,
    ) -> Result<Option<Visit>, PersistenceError> {
        let dedup_key = event.dedup_key(delivery_id);
        self.repository.record_once(event.into(), &dedup_key).await
    }

    /// Number of visits stored for a short link.
    pub async fn count_visits(&self, short_url_id: Uuid) -> Result<i64, PersistenceError> {
        self.repository.count_for_short_url(short_url_id).await
    }
}
