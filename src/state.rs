//! Shared application state injected into HTTP handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::application::services::RedirectService;
use crate::domain::repositories::ShortUrlRepository;
use crate::infrastructure::queue::VisitQueue;

/// Redirect service over trait objects, as stored in [`AppState`].
pub type DynRedirectService = RedirectService<dyn ShortUrlRepository, dyn VisitQueue>;

/// Application state shared by every request.
///
/// Cheap to clone: every field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub redirect_service: Arc<DynRedirectService>,
    pub short_urls: Arc<dyn ShortUrlRepository>,
    pub queue: Arc<dyn VisitQueue>,
}

impl AppState {
    /// Builds the state from the link store and the broker producer.
    pub fn new(
        short_urls: Arc<dyn ShortUrlRepository>,
        queue: Arc<dyn VisitQueue>,
        enqueue_timeout: Duration,
    ) -> Self {
        let redirect_service = Arc::new(RedirectService::new(
            short_urls.clone(),
            queue.clone(),
            enqueue_timeout,
        ));

        Self {
            redirect_service,
            short_urls,
            queue,
        }
    }
}
