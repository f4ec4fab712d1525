//! Visit entity: one recorded redirect.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// A persisted visit to a short link.
///
/// Append-only. `id` and `visited_at` are assigned by the database.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Visit {
    pub id: Uuid,
    pub short_url_id: Uuid,
    pub visited_at: DateTime<Utc>,
    pub ip_address: String,
    pub user_agent: String,
}

/// Input data for inserting a visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVisit {
    pub short_url_id: Uuid,
    pub ip_address: String,
    pub user_agent: String,
}
