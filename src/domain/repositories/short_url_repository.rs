//! Repository trait for short link lookups.

use crate::domain::entities::ShortUrl;
use async_trait::async_trait;

/// Read-only access to short links.
///
/// # Implementations
///
/// - [`crate::infrastructure::persistence::PgShortUrlRepository`] - PostgreSQL implementation
/// - Test mocks available with `cfg(test)`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ShortUrlRepository: Send + Sync {
    /// Finds a short link by exact short code match.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(ShortUrl))` if found (expired links included)
    /// - `Ok(None)` if not found
    ///
    /// # Errors
    ///
    /// Returns the underlying [`sqlx::Error`] when storage is unavailable.
    async fn find_by_code(&self, code: &str) -> Result<Option<ShortUrl>, sqlx::Error>;

    /// Checks that storage answers queries.
    async fn health_check(&self) -> bool;
}
