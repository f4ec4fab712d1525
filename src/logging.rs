//! Tracing subscriber setup shared by the server and the worker binaries.

use tracing_subscriber::EnvFilter;

/// Installs the global subscriber.
///
/// `log_level` is an `EnvFilter` directive string such as `info` or
/// `shortlink_telemetry=debug,sqlx=warn`; an invalid one falls back to `info`.
/// `log_format` is `json` for one JSON object per line, anything else for
/// human-readable output.
pub fn init(log_level: &str, log_format: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if log_format.eq_ignore_ascii_case("json") {
        builder.json().with_current_span(true).init();
    } else {
        builder.with_target(false).init();
    }
}
