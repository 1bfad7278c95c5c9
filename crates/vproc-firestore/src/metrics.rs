//! Firestore request metrics.

use metrics::{counter, histogram};

/// Metric name constants.
pub mod names {
    /// Total Firestore requests by operation and status.
    pub const REQUESTS_TOTAL: &str = "vproc_firestore_requests_total";

    /// Total retry attempts by operation.
    pub const RETRIES_TOTAL: &str = "vproc_firestore_retries_total";

    /// Request latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "vproc_firestore_latency_seconds";
}

/// Record metrics for a completed Firestore request.
pub fn record_request(operation: &'static str, status: u16, latency_secs: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation,
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(names::LATENCY_SECONDS, "operation" => operation).record(latency_secs);
}

/// Record a retry attempt.
pub fn record_retry(operation: &'static str) {
    counter!(names::RETRIES_TOTAL, "operation" => operation).increment(1);
}
