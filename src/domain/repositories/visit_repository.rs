//! Repository trait for visit persistence.

use crate::domain::entities::{NewVisit, Visit};
use crate::error::PersistenceError;
use async_trait::async_trait;
use uuid::Uuid;

/// Append-only visit storage owned by a worker process.
///
/// An implementation wraps the process's database engine; [`Self::close`] is the
/// final disposal that releases its connection pool.
///
/// # Implementations
///
/// - [`crate::infrastructure::persistence::PgVisitRepository`] - PostgreSQL implementation
/// - Test mocks available with `cfg(test)`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VisitRepository: Send + Sync {
    /// Inserts one visit in its own transaction and returns the stored row.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::UnknownShortUrl`] on a foreign-key violation and
    /// [`PersistenceError::Database`] on any other database error.
    async fn record(&self, new_visit: NewVisit) -> Result<Visit, PersistenceError>;

    /// Inserts one visit unless a visit with `dedup_key` already exists.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Visit))` if a row was inserted
    /// - `Ok(None)` if the key was already recorded
    async fn record_once(
        &self,
        new_visit: NewVisit,
        dedup_key: &str,
    ) -> Result<Option<Visit>, PersistenceError>;

    /// Counts visits recorded for a short link.
    async fn count_for_short_url(&self, short_url_id: Uuid) -> Result<i64, PersistenceError>;

    /// Releases every pooled connection. Called once, at process stop.
    async fn close(&self);
}
