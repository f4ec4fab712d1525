//! PostgreSQL implementation of short link lookups.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

use crate::domain::entities::ShortUrl;
use crate::domain::repositories::ShortUrlRepository;

/// PostgreSQL repository for short link lookups.
pub struct PgShortUrlRepository {
    pool: Arc<PgPool>,
}

impl PgShortUrlRepository {
    /// Creates a new repository with a database connection pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ShortUrlRepository for PgShortUrlRepository {
    async fn find_by_code(&self, code: &str) -> Result<Option<ShortUrl>, sqlx::Error> {
        sqlx::query_as::<_, ShortUrl>(
            r#"
            SELECT id, original_url, short_code, user_id, visit_count, created_at, expires_at
            FROM short_urls
            WHERE short_code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(self.pool.as_ref())
        .await
    }

    async fn health_check(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(self.pool.as_ref())
            .await
            .is_ok()
    }
}
