//! Error types for the redirect path, the broker and the worker.
//!
//! Errors are split by where they surface:
//!
//! - [`ResolveError`] - returned to the caller of a redirect lookup
//! - [`EnqueueError`] - visit handoff to the broker failed (never changes the redirect)
//! - [`QueueError`] - consumer-side broker failures inside a worker
//! - [`PersistenceError`] - database write failed inside a worker
//! - [`LifecycleError`] - persistence attempted outside a running worker context
//! - [`TaskError`] - everything a task invocation can fail with
//! - [`AppError`] - the HTTP representation of the above

use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::worker::LifecycleState;
use crate::worker::bridge::BridgeError;

/// Outcome of a failed short-code resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("short code '{code}' not found")]
    NotFound { code: String },

    #[error("short link lookup failed: {0}")]
    LookupFailed(#[source] sqlx::Error),
}

/// Failure to hand a visit event to the broker.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("broker unreachable: {0}")]
    Broker(#[from] redis::RedisError),

    #[error("broker did not accept the message within {0:?}")]
    TimedOut(Duration),

    #[error("failed to serialize task message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("broker is closed")]
    Closed,
}

/// Consumer-side broker failure.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("broker error: {0}")]
    Broker(#[from] redis::RedisError),

    #[error("malformed task message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Database write error raised while persisting a visit.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("short link {short_url_id} does not exist")]
    UnknownShortUrl { short_url_id: uuid::Uuid },

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for PersistenceError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e)
    }
}

impl PersistenceError {
    /// Maps a failed visit insert, naming the short link on a foreign-key violation.
    pub fn from_insert(e: sqlx::Error, short_url_id: uuid::Uuid) -> Self {
        if let Some(db) = e.as_database_error()
            && db.is_foreign_key_violation()
        {
            return Self::UnknownShortUrl { short_url_id };
        }

        Self::Database(e)
    }
}

/// Persistence attempted, or a lifecycle transition requested, in the wrong state.
///
/// Always a supervisor defect, never a transient condition.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("worker context is {0}, persistence requires a running context")]
    NotRunning(LifecycleState),

    #[error("worker context cannot start from state {0}")]
    AlreadyStarted(LifecycleState),

    #[error("worker context cannot stop from state {0}")]
    NotStoppable(LifecycleState),

    #[error("failed to construct the database engine: {0}")]
    EngineFailed(#[source] PersistenceError),

    #[error("execution loop failure: {0}")]
    Loop(#[from] BridgeError),
}

/// Error returned by a task invocation.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("unit of work did not complete within {0:?}")]
    TimedOut(Duration),

    /// The unit of work panicked or was dropped unfinished. Affects only this
    /// message; the context keeps running.
    #[error("unit of work aborted: {0}")]
    Aborted(#[source] BridgeError),

    #[error("invalid task payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no task registered under '{0}'")]
    UnknownTask(String),
}

impl From<BridgeError> for TaskError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::TimedOut(limit) => Self::TimedOut(limit),
            aborted @ (BridgeError::Abandoned | BridgeError::Panicked) => Self::Aborted(aborted),
            other => Self::Lifecycle(LifecycleError::Loop(other)),
        }
    }
}

impl TaskError {
    /// Lifecycle failures must not be retried or recorded as ordinary task failures.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Lifecycle(_))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorInfo,
}

#[derive(Serialize)]
struct ErrorInfo {
    code: &'static str,
    message: String,
    details: Value,
}

/// HTTP-facing error rendered as a JSON body.
#[derive(Debug)]
pub enum AppError {
    NotFound { message: String, details: Value },
    Unavailable { message: String, details: Value },
}

impl AppError {
    pub fn not_found(message: impl Into<String>, details: Value) -> Self {
        Self::NotFound {
            message: message.into(),
            details,
        }
    }
    pub fn unavailable(message: impl Into<String>, details: Value) -> Self {
        Self::Unavailable {
            message: message.into(),
            details,
        }
    }
}

impl From<ResolveError> for AppError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::NotFound { code } => {
                AppError::not_found("Short link not found", json!({ "code": code }))
            }
            ResolveError::LookupFailed(e) => {
                tracing::error!("Short link lookup failed: {}", e);
                AppError::unavailable("Link storage unavailable", json!({}))
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match self {
            AppError::NotFound { message, details } => {
                (StatusCode::NOT_FOUND, "not_found", message, details)
            }
            AppError::Unavailable { message, details } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                message,
                details,
            ),
        };

        let body = ErrorBody {
            error: ErrorInfo {
                code,
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}
