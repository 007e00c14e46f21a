use std::env;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use crate::core::ThrottleReason;

/// Initialize the logging system with the specified log level
///
/// Calling this more than once keeps the first subscriber.
pub fn init_logging() {
    // Get the log level from environment variable or default to INFO
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_level(true)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Create a new span for tracking request context
pub fn create_request_span(request_id: &str, ip: &str) -> tracing::Span {
    tracing::info_span!(
        "inspect",
        request_id = %request_id,
        ip = %ip,
        timestamp = %chrono::Utc::now()
    )
}

/// Log the outcome of a throttle decision
pub fn log_throttle_decision(ip: &str, reason: ThrottleReason, total_count: u64) {
    match reason {
        ThrottleReason::Ok => tracing::debug!(
            ip = %ip,
            total_count,
            event = "throttle_allow"
        ),
        ThrottleReason::RateLimited => tracing::info!(
            ip = %ip,
            total_count,
            event = "throttle_rate_limited",
            "suspicious input logging throttled for ip"
        ),
        ThrottleReason::Blocked => tracing::debug!(
            ip = %ip,
            total_count,
            event = "throttle_blocked"
        ),
    }
}

/// Log a state store event (load, flush, prune)
pub fn log_store_event(event_type: &str, success: bool, details: Option<&str>) {
    if success {
        tracing::debug!(
            event_type = %event_type,
            success = %success,
            details = ?details,
            timestamp = %chrono::Utc::now()
        );
    } else {
        tracing::warn!(
            event_type = %event_type,
            success = %success,
            details = ?details,
            timestamp = %chrono::Utc::now()
        );
    }
}
