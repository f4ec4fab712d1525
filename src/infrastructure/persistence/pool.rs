//! Connection pool construction.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::config::PoolConfig;

/// Opens a PostgreSQL pool sized by `pool_size + max_overflow`.
///
/// `pool_size` connections are kept open; up to `max_overflow` more are opened
/// under load. When all are checked out, callers wait up to `timeout_secs`
/// instead of being rejected. Connections are recycled after `recycle_secs`
/// and pinged before reuse.
///
/// The pool spawns its maintenance tasks on the runtime that calls this
/// function, so a worker must call it from its own execution loop.
pub async fn connect_pool(database_url: &str, config: &PoolConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .min_connections(config.pool_size)
        .max_connections(config.max_connections())
        .acquire_timeout(Duration::from_secs(config.timeout_secs))
        .max_lifetime(Duration::from_secs(config.recycle_secs))
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    info!(
        "Database pool ready (pool_size={}, max_overflow={})",
        config.pool_size, config.max_overflow
    );

    Ok(pool)
}
