//! Handler for short URL redirect.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, header},
    response::Redirect,
};
use tracing::debug;

use crate::error::AppError;
use crate::state::AppState;

/// Redirects a short code to its original URL.
///
/// # Endpoint
///
/// `GET /{code}`
///
/// # Request Flow
///
/// 1. Look up the short code (expired links count as missing)
/// 2. Enqueue a visit event with the client IP and `User-Agent`
/// 3. Return 307 Temporary Redirect
///
/// The visit is handed off within a bounded wait. A broker failure is logged and
/// the redirect is returned anyway; nothing is written to the database here.
///
/// # Errors
///
/// Returns 404 Not Found if the code is unknown or expired.
/// Returns 503 Service Unavailable if the link store cannot be reached.
pub async fn redirect_handler(
    Path(code): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Redirect, AppError> {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let resolution = state
        .redirect_service
        .resolve(&code, addr.ip(), user_agent)
        .await?;

    debug!(
        code = %code,
        queued = resolution.handoff.is_ok(),
        "Redirecting to {}",
        resolution.original_url
    );

    Ok(Redirect::temporary(&resolution.original_url))
}
