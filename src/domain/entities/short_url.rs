//! Short link entity as stored by the URL-management service.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// A short code mapped to its original URL.
///
/// Read-only here: rows are created and updated by the URL-management service,
/// the redirect path only looks them up.
#[derive(Debug, Clone, FromRow)]
pub struct ShortUrl {
    pub id: Uuid,
    pub original_url: String,
    pub short_code: String,
    pub user_id: Option<Uuid>,
    pub visit_count: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ShortUrl {
    /// Returns `true` once `expires_at` has passed.
    ///
    /// Links without an expiry never expire.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn link(expires_at: Option<DateTime<Utc>>) -> ShortUrl {
        ShortUrl {
            id: Uuid::new_v4(),
            original_url: "https://example.com/page".to_string(),
            short_code: "aB78xZ9k2L3m".to_string(),
            user_id: None,
            visit_count: 0,
            created_at: Utc::now(),
            expires_at,
        }
    }

    #[test]
    fn test_link_without_expiry_never_expires() {
        assert!(!link(None).is_expired_at(Utc::now() + Duration::days(3650)));
    }

    #[test]
    fn test_link_expires_at_boundary() {
        let now = Utc::now();
        let short_url = link(Some(now));

        assert!(short_url.is_expired_at(now));
        assert!(!short_url.is_expired_at(now - Duration::seconds(1)));
    }
}
