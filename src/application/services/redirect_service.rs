//! Redirect resolution with visit handoff.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tracing::{debug, warn};

use crate::domain::repositories::ShortUrlRepository;
use crate::domain::visit_event::{TaskMessage, VisitEvent};
use crate::error::{EnqueueError, ResolveError};
use crate::infrastructure::queue::VisitQueue;

/// A resolved short code.
#[derive(Debug)]
pub struct Resolution {
    /// Redirect target.
    pub original_url: String,
    /// Whether the visit event reached the broker. Informational only: the
    /// redirect is the same either way.
    ///
    /// [`EnqueueError::TimedOut`] means "not confirmed", not "not delivered".
    /// The push may already be on the wire when the timeout drops it, so the
    /// broker can still receive the event, and `visits_enqueue_failed_total`
    /// counts it as a failure.
    pub handoff: Result<(), EnqueueError>,
}

/// Resolves short codes and hands a visit event to the broker for each hit.
///
/// Never writes to the database. Visit persistence happens later, in a worker.
pub struct RedirectService<R: ShortUrlRepository + ?Sized, Q: VisitQueue + ?Sized> {
    short_urls: Arc<R>,
    queue: Arc<Q>,
    enqueue_timeout: Duration,
}

impl<R: ShortUrlRepository + ?Sized, Q: VisitQueue + ?Sized> RedirectService<R, Q> {
    /// Creates a new redirect service.
    ///
    /// `enqueue_timeout` bounds how long a redirect may wait on the broker.
    pub fn new(short_urls: Arc<R>, queue: Arc<Q>, enqueue_timeout: Duration) -> Self {
        Self {
            short_urls,
            queue,
            enqueue_timeout,
        }
    }

    /// Resolves `code` and enqueues a visit event for the hit.
    ///
    /// Expired links resolve like unknown ones.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::NotFound`] for an unknown or expired code.
    /// Returns [`ResolveError::LookupFailed`] if the link store is unavailable.
    /// Broker failures are never returned here; see [`Resolution::handoff`].
    pub async fn resolve(
        &self,
        code: &str,
        ip: IpAddr,
        user_agent: &str,
    ) -> Result<Resolution, ResolveError> {
        let short_url = match self
            .short_urls
            .find_by_code(code)
            .await
            .map_err(ResolveError::LookupFailed)?
        {
            Some(short_url) if short_url.is_expired_at(Utc::now()) => {
                debug!("Short code {} has expired", code);
                None
            }
            other => other,
        }
        .ok_or_else(|| ResolveError::NotFound {
            code: code.to_string(),
        })?;

        let event = VisitEvent::new(short_url.id, ip.to_string(), user_agent);
        let handoff = self.hand_off(&event).await;

        Ok(Resolution {
            original_url: short_url.original_url,
            handoff,
        })
    }

    async fn hand_off(&self, event: &VisitEvent) -> Result<(), EnqueueError> {
        let result = match TaskMessage::record_visit(event) {
            Ok(message) => {
                match tokio::time::timeout(self.enqueue_timeout, self.queue.enqueue(message)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(EnqueueError::TimedOut(self.enqueue_timeout)),
                }
            }
            Err(e) => Err(e.into()),
        };

        match &result {
            Ok(()) => counter!("visits_enqueued_total").increment(1),
            Err(e) => {
                warn!(short_url_id = %event.short_url_id, "Visit not enqueued: {}", e);
                counter!("visits_enqueue_failed_total").increment(1);
            }
        }

        result
    }
}
