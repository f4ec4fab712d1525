#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::ConnectInfo;
use chrono::{Duration as ChronoDuration, Utc};
use shortlink_telemetry::config::WorkerConfig;
use shortlink_telemetry::domain::entities::{NewVisit, ShortUrl, Visit};
use shortlink_telemetry::domain::repositories::{ShortUrlRepository, VisitRepository};
use shortlink_telemetry::domain::visit_event::{TaskMessage, VisitEvent};
use shortlink_telemetry::error::PersistenceError;
use shortlink_telemetry::infrastructure::queue::{MemoryQueue, VisitQueue};
use shortlink_telemetry::state::AppState;
use shortlink_telemetry::worker::WorkerContext;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Short link store backed by a map.
#[derive(Default)]
pub struct InMemoryShortUrls {
    links: Mutex<HashMap<String, ShortUrl>>,
    unavailable: AtomicBool,
}

impl InMemoryShortUrls {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, code: &str, url: &str) -> ShortUrl {
        self.insert_with_expiry(code, url, None)
    }

    pub fn insert_expired(&self, code: &str, url: &str) -> ShortUrl {
        self.insert_with_expiry(code, url, Some(Utc::now() - ChronoDuration::hours(1)))
    }

    fn insert_with_expiry(
        &self,
        code: &str,
        url: &str,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> ShortUrl {
        let short_url = ShortUrl {
            id: Uuid::new_v4(),
            original_url: url.to_string(),
            short_code: code.to_string(),
            user_id: None,
            visit_count: 0,
            created_at: Utc::now(),
            expires_at,
        };
        self.links
            .lock()
            .unwrap()
            .insert(code.to_string(), short_url.clone());
        short_url
    }

    /// Makes every lookup fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ShortUrlRepository for InMemoryShortUrls {
    async fn find_by_code(&self, code: &str) -> Result<Option<ShortUrl>, sqlx::Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(self.links.lock().unwrap().get(code).cloned())
    }

    async fn health_check(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }
}

/// Visit store that behaves like a bounded connection pool.
///
/// Every insert holds one of `max_connections` permits for `latency`, waiting at
/// most `acquire_timeout` for a free one. Tracks the peak number of inserts in
/// progress and the threads they ran on.
pub struct InMemoryVisits {
    visits: Mutex<Vec<Visit>>,
    dedup_keys: Mutex<HashSet<String>>,
    known_short_urls: Mutex<Option<HashSet<Uuid>>>,
    connections: Semaphore,
    acquire_timeout: Duration,
    latency: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    threads: Mutex<HashSet<String>>,
    closes: AtomicUsize,
}

impl InMemoryVisits {
    pub fn new() -> Arc<Self> {
        Self::with_pool(30, Duration::ZERO)
    }

    pub fn with_pool(max_connections: usize, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            visits: Mutex::new(Vec::new()),
            dedup_keys: Mutex::new(HashSet::new()),
            known_short_urls: Mutex::new(None),
            connections: Semaphore::new(max_connections),
            acquire_timeout: Duration::from_secs(30),
            latency,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            threads: Mutex::new(HashSet::new()),
            closes: AtomicUsize::new(0),
        })
    }

    /// Rejects inserts for short links outside `ids`, like the foreign key does.
    pub fn require_known(&self, ids: impl IntoIterator<Item = Uuid>) {
        *self.known_short_urls.lock().unwrap() = Some(ids.into_iter().collect());
    }

    pub fn visits(&self) -> Vec<Visit> {
        self.visits.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.visits.lock().unwrap().len()
    }

    pub fn peak_connections(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn threads(&self) -> HashSet<String> {
        self.threads.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    async fn insert(
        &self,
        new_visit: NewVisit,
        dedup_key: Option<&str>,
    ) -> Result<Option<Visit>, PersistenceError> {
        let _connection =
            match tokio::time::timeout(self.acquire_timeout, self.connections.acquire()).await {
                Ok(Ok(permit)) => permit,
                _ => return Err(PersistenceError::Database(sqlx::Error::PoolTimedOut)),
            };

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(name) = std::thread::current().name() {
            self.threads.lock().unwrap().insert(name.to_string());
        }

        tokio::time::sleep(self.latency).await;
        let result = self.store(new_visit, dedup_key);

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn store(
        &self,
        new_visit: NewVisit,
        dedup_key: Option<&str>,
    ) -> Result<Option<Visit>, PersistenceError> {
        if let Some(known) = self.known_short_urls.lock().unwrap().as_ref()
            && !known.contains(&new_visit.short_url_id)
        {
            return Err(PersistenceError::UnknownShortUrl {
                short_url_id: new_visit.short_url_id,
            });
        }

        if let Some(key) = dedup_key
            && !self.dedup_keys.lock().unwrap().insert(key.to_string())
        {
            return Ok(None);
        }

        let visit = Visit {
            id: Uuid::new_v4(),
            short_url_id: new_visit.short_url_id,
            visited_at: Utc::now(),
            ip_address: new_visit.ip_address,
            user_agent: new_visit.user_agent,
        };
        self.visits.lock().unwrap().push(visit.clone());
        Ok(Some(visit))
    }
}

#[async_trait]
impl VisitRepository for InMemoryVisits {
    async fn record(&self, new_visit: NewVisit) -> Result<Visit, PersistenceError> {
        let visit = self.insert(new_visit, None).await?;
        visit.ok_or(PersistenceError::Database(sqlx::Error::RowNotFound))
    }

    async fn record_once(
        &self,
        new_visit: NewVisit,
        dedup_key: &str,
    ) -> Result<Option<Visit>, PersistenceError> {
        self.insert(new_visit, Some(dedup_key)).await
    }

    async fn count_for_short_url(&self, short_url_id: Uuid) -> Result<i64, PersistenceError> {
        let count = self
            .visits
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.short_url_id == short_url_id)
            .count();
        Ok(count as i64)
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn worker_config() -> WorkerConfig {
    WorkerConfig {
        concurrency: 4,
        poll_interval_ms: 20,
        persist_timeout_secs: 10,
        shutdown_timeout_secs: 10,
        deduplicate: false,
    }
}

/// A context started with `visits` as its engine.
pub fn running_context(config: &WorkerConfig, visits: Arc<InMemoryVisits>) -> Arc<WorkerContext> {
    let context = Arc::new(WorkerContext::new(config));
    context
        .start(move || async move { Ok(visits as Arc<dyn VisitRepository>) })
        .unwrap();
    context
}

pub fn create_test_state(short_urls: Arc<InMemoryShortUrls>, queue: Arc<dyn VisitQueue>) -> AppState {
    AppState::new(short_urls, queue, Duration::from_millis(250))
}

/// Enqueues a visit event from synchronous test code.
pub fn enqueue_visit(queue: &MemoryQueue, event: &VisitEvent) -> TaskMessage {
    let message = TaskMessage::record_visit(event).unwrap();
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(queue.enqueue(message.clone()))
        .unwrap();
    message
}

/// Polls `condition` for up to five seconds.
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Inserts a fixed peer address, standing in for
/// `into_make_service_with_connect_info` in tests.
#[derive(Clone)]
pub struct PeerAddrLayer {
    addr: SocketAddr,
}

impl PeerAddrLayer {
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.parse().unwrap(),
        }
    }
}

impl<S> tower::Layer<S> for PeerAddrLayer {
    type Service = PeerAddrService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PeerAddrService {
            inner,
            addr: self.addr,
        }
    }
}

#[derive(Clone)]
pub struct PeerAddrService<S> {
    inner: S,
    addr: SocketAddr,
}

impl<S, B> tower::Service<axum::http::Request<B>> for PeerAddrService<S>
where
    S: tower::Service<axum::http::Request<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: axum::http::Request<B>) -> Self::Future {
        req.extensions_mut().insert(ConnectInfo(self.addr));
        self.inner.call(req)
    }
}
