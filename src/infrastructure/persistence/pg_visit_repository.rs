//! PostgreSQL implementation of visit persistence.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::entities::{NewVisit, Visit};
use crate::domain::repositories::VisitRepository;
use crate::error::PersistenceError;

/// PostgreSQL repository for visit inserts.
///
/// Owns the worker process's pool. Each insert runs in its own transaction and
/// reloads the server-generated columns through `RETURNING` before the
/// connection goes back to the pool.
pub struct PgVisitRepository {
    pool: PgPool,
}

impl PgVisitRepository {
    /// Creates a new repository that takes ownership of the pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VisitRepository for PgVisitRepository {
    async fn record(&self, new_visit: NewVisit) -> Result<Visit, PersistenceError> {
        let short_url_id = new_visit.short_url_id;
        let mut tx = self.pool.begin().await?;

        let visit = sqlx::query_as::<_, Visit>(
            r#"
            INSERT INTO visits (short_url_id, ip_address, user_agent)
            VALUES ($1, $2, $3)
            RETURNING id, short_url_id, visited_at, ip_address, user_agent
            "#,
        )
        .bind(new_visit.short_url_id)
        .bind(new_visit.ip_address)
        .bind(new_visit.user_agent)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| PersistenceError::from_insert(e, short_url_id))?;

        tx.commit().await?;

        debug!("Recorded visit {} for {}", visit.id, visit.short_url_id);
        Ok(visit)
    }

    async fn record_once(
        &self,
        new_visit: NewVisit,
        dedup_key: &str,
    ) -> Result<Option<Visit>, PersistenceError> {
        let short_url_id = new_visit.short_url_id;
        let mut tx = self.pool.begin().await?;

        let visit = sqlx::query_as::<_, Visit>(
            r#"
            INSERT INTO visits (short_url_id, ip_address, user_agent, dedup_key)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (dedup_key) DO NOTHING
            RETURNING id, short_url_id, visited_at, ip_address, user_agent
            "#,
        )
        .bind(new_visit.short_url_id)
        .bind(new_visit.ip_address)
        .bind(new_visit.user_agent)
        .bind(dedup_key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| PersistenceError::from_insert(e, short_url_id))?;

        tx.commit().await?;

        if visit.is_none() {
            debug!("Skipped duplicate visit delivery {}", dedup_key);
        }
        Ok(visit)
    }

    async fn count_for_short_url(&self, short_url_id: Uuid) -> Result<i64, PersistenceError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM visits WHERE short_url_id = $1",
        )
        .bind(short_url_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }
}
