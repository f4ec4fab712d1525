//! Redis-backed broker.
//!
//! Messages are JSON task envelopes on a Redis list. Producers `LPUSH` onto
//! `<name>`; consumers `BLMOVE` the oldest message into `<name>:processing` so
//! it survives a worker crash; `ack` removes it from there and `fail` moves it to
//! `<name>:failed` together with the failure reason.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, Client, RedisError, RedisResult, aio::ConnectionManager};
use serde_json::json;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};

use super::service::{Delivery, TaskConsumer, VisitQueue};
use crate::domain::visit_event::TaskMessage;
use crate::error::{EnqueueError, QueueError};

const CONNECT_ATTEMPTS: usize = 6;

/// Delays between broker connection attempts.
fn connect_backoff() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(100)
        .max_delay(Duration::from_secs(5))
        .map(jitter)
        .take(CONNECT_ATTEMPTS)
}

/// Runs `attempt` until it succeeds, sleeping the calling thread for each delay
/// in between. Returns the last error once `delays` is exhausted.
fn retry_blocking<T, E, F>(delays: impl IntoIterator<Item = Duration>, mut attempt: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    let mut delays = delays.into_iter();
    loop {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(e) => match delays.next() {
                Some(delay) => {
                    warn!("Broker connection attempt failed: {}", e);
                    std::thread::sleep(delay);
                }
                None => return Err(e),
            },
        }
    }
}

/// Redis key names derived from a queue name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    pub queue: String,
    pub processing: String,
    pub failed: String,
}

impl QueueKeys {
    pub fn new(name: &str) -> Self {
        Self {
            queue: name.to_string(),
            processing: format!("{name}:processing"),
            failed: format!("{name}:failed"),
        }
    }
}

/// Producer half of the Redis broker.
///
/// Uses `ConnectionManager` for reconnecting, shared connections.
pub struct RedisVisitQueue {
    manager: ConnectionManager,
    keys: QueueKeys,
}

impl RedisVisitQueue {
    /// Connects to Redis, retrying with exponential backoff, and validates the
    /// connection with a PING.
    ///
    /// # Errors
    ///
    /// Returns the last connection error once all attempts are exhausted.
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, EnqueueError> {
        info!("Connecting to broker at {}", redis_url);

        let client = Client::open(redis_url)?;

        let manager = Retry::spawn(connect_backoff(), || {
            let client = client.clone();
            async move {
                ConnectionManager::new(client).await.inspect_err(|e| {
                    warn!("Broker connection attempt failed: {}", e);
                })
            }
        })
        .await?;

        let mut test_conn = manager.clone();
        test_conn.ping::<()>().await?;

        info!("✓ Connected to broker, queue '{}'", queue_name);

        Ok(Self {
            manager,
            keys: QueueKeys::new(queue_name),
        })
    }
}

#[async_trait]
impl VisitQueue for RedisVisitQueue {
    async fn enqueue(&self, message: TaskMessage) -> Result<(), EnqueueError> {
        let payload = serde_json::to_string(&message)?;
        let mut conn = self.manager.clone();

        conn.lpush::<_, _, ()>(&self.keys.queue, payload).await?;

        debug!("Enqueued {} ({})", message.id, message.task);
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.manager.clone();
        conn.ping::<()>().await.is_ok()
    }
}

/// Consumer half of the Redis broker, one per task-execution thread.
///
/// Replaces its connection after the broker drops it, so a Redis restart costs
/// one failed call per thread.
pub struct RedisTaskConsumer {
    client: Client,
    conn: redis::Connection,
    keys: QueueKeys,
}

impl RedisTaskConsumer {
    /// Opens a dedicated blocking connection, retrying with exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns the last connection error once all attempts are exhausted.
    pub fn connect(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client = Client::open(redis_url)?;
        let conn = retry_blocking(connect_backoff(), || client.get_connection())?;

        Ok(Self {
            client,
            conn,
            keys: QueueKeys::new(queue_name),
        })
    }

    /// Passes `result` through, reconnecting first if it failed on a dead
    /// connection.
    fn checked<T>(&mut self, result: RedisResult<T>) -> Result<T, QueueError> {
        result.map_err(|e| {
            self.reconnect_after(&e);
            QueueError::Broker(e)
        })
    }

    fn reconnect_after(&mut self, e: &RedisError) {
        if !(e.is_connection_dropped() || e.is_io_error()) {
            return;
        }

        match self.client.get_connection() {
            Ok(conn) => {
                self.conn = conn;
                info!("Reconnected to broker after: {}", e);
            }
            Err(reconnect) => warn!("Broker reconnect failed: {}", reconnect),
        }
    }

    fn record_failure(&mut self, raw: &str, reason: &str) -> Result<(), QueueError> {
        let record = json!({
            "message": raw,
            "error": reason,
            "failed_at": Utc::now(),
        })
        .to_string();

        let result = redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(&self.keys.processing)
            .arg(1)
            .arg(raw)
            .ignore()
            .cmd("LPUSH")
            .arg(&self.keys.failed)
            .arg(record)
            .ignore()
            .query::<()>(&mut self.conn);

        self.checked(result)
    }
}

impl TaskConsumer for RedisTaskConsumer {
    fn dequeue(&mut self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        // A BLMOVE timeout of zero blocks forever.
        let timeout = wait.as_secs_f64().max(0.01);

        let result = redis::cmd("BLMOVE")
            .arg(&self.keys.queue)
            .arg(&self.keys.processing)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout)
            .query::<Option<String>>(&mut self.conn);
        let raw = self.checked(result)?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<TaskMessage>(&raw) {
            Ok(message) => Ok(Some(Delivery::new(message, raw))),
            Err(e) => {
                self.record_failure(&raw, &format!("malformed task message: {e}"))?;
                Err(QueueError::Malformed(e))
            }
        }
    }

    fn ack(&mut self, delivery: &Delivery) -> Result<(), QueueError> {
        let result = redis::cmd("LREM")
            .arg(&self.keys.processing)
            .arg(1)
            .arg(delivery.raw())
            .query::<i64>(&mut self.conn);

        self.checked(result).map(|_| ())
    }

    fn fail(&mut self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        self.record_failure(delivery.raw(), reason)
    }

    fn recover(&mut self) -> Result<usize, QueueError> {
        let mut moved = 0;

        loop {
            let result = redis::cmd("LMOVE")
                .arg(&self.keys.processing)
                .arg(&self.keys.queue)
                .arg("RIGHT")
                .arg("RIGHT")
                .query::<Option<String>>(&mut self.conn);
            let raw = self.checked(result)?;

            if raw.is_none() {
                break;
            }
            moved += 1;
        }

        if moved > 0 {
            info!("Requeued {} in-flight messages from {}", moved, self.keys.processing);
        }
        Ok(moved)
    }
}
