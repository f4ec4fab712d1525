//! PostgreSQL repository implementations.
//!
//! - [`PgShortUrlRepository`] - Short link lookups for the redirect path
//! - [`PgVisitRepository`] - Visit inserts for the worker path
//! - [`connect_pool`] - Pool construction from [`crate::config::PoolConfig`]

pub mod pg_short_url_repository;
pub mod pg_visit_repository;
pub mod pool;

pub use pg_short_url_repository::PgShortUrlRepository;
pub use pg_visit_repository::PgVisitRepository;
pub use pool::connect_pool;
