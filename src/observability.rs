use std::net::SocketAddr;

use crate::engine::EngineError;

// ── Booking flow ────────────────────────────────────────────────

/// Counter: booking requests by result. Labels: outcome.
pub const BOOKING_REQUESTS_TOTAL: &str = "pitchbook_booking_requests_total";

/// Counter: requests rejected because the range was already taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "pitchbook_booking_conflicts_total";

/// Counter: booking status changes. Labels: status.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "pitchbook_booking_transitions_total";

/// Counter: availability and free-window lookups. Labels: kind.
pub const AVAILABILITY_QUERIES_TOTAL: &str = "pitchbook_availability_queries_total";

/// Histogram: engine operation latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "pitchbook_request_duration_seconds";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "pitchbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "pitchbook_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "pitchbook_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), String> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus exporter: {e}"))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for the `outcome` of a fallible engine call.
pub fn outcome_label<T>(result: &Result<T, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => error_label(e),
    }
}

pub fn error_label(err: &EngineError) -> &'static str {
    match err {
        EngineError::InvalidRange(_) => "invalid_range",
        EngineError::Conflict { .. } => "conflict",
        EngineError::NotFound(_) => "not_found",
        EngineError::InvalidTransition { .. } => "invalid_transition",
        EngineError::InvalidRequest(_) => "invalid_request",
        EngineError::LimitExceeded(_) => "limit_exceeded",
        EngineError::Storage(_) => "storage",
    }
}
