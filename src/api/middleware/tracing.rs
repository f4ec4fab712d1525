//! HTTP request/response tracing middleware.

use std::time::Duration;

use axum::{body::Body, http::Request, response::Response};
use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::TraceLayer;
use tracing::{Span, info, info_span, warn};

type MakeSpan = fn(&Request<Body>) -> Span;
type OnResponse = fn(&Response, Duration, &Span);
type OnFailure = fn(ServerErrorsFailureClass, Duration, &Span);

/// Creates a tracing middleware for HTTP requests.
///
/// Each request gets an `INFO` span carrying the method and path; the response
/// is logged with its status and latency in milliseconds.
///
/// ```text
/// INFO request{method=GET path=/aB78xZ9k2L3m}: status=307 latency_ms=3
/// ```
pub fn layer() -> TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    MakeSpan,
    tower_http::trace::DefaultOnRequest,
    OnResponse,
    tower_http::trace::DefaultOnBodyChunk,
    tower_http::trace::DefaultOnEos,
    OnFailure,
> {
    TraceLayer::new_for_http()
        .make_span_with(make_span as MakeSpan)
        .on_response(on_response as OnResponse)
        .on_failure(on_failure as OnFailure)
}

fn make_span(request: &Request<Body>) -> Span {
    info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
    )
}

fn on_response(response: &Response, latency: Duration, _span: &Span) {
    info!(
        status = response.status().as_u16(),
        latency_ms = latency.as_millis() as u64,
        "Response sent"
    );
}

fn on_failure(failure: ServerErrorsFailureClass, latency: Duration, _span: &Span) {
    warn!(
        latency_ms = latency.as_millis() as u64,
        "Request failed: {}", failure
    );
}
