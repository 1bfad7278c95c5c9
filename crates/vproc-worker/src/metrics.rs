//! Worker metrics.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Metric names as constants for consistency.
pub mod names {
    /// Settled jobs by outcome and error kind.
    pub const JOBS_TOTAL: &str = "vproc_jobs_total";
    /// Jobs currently running on this worker.
    pub const JOBS_IN_FLIGHT: &str = "vproc_jobs_in_flight";
    /// Wall time per pipeline stage.
    pub const STAGE_DURATION_SECONDS: &str = "vproc_stage_duration_seconds";
    /// Whole-job wall time.
    pub const JOB_DURATION_SECONDS: &str = "vproc_job_duration_seconds";
}

/// Serve `/metrics` on `port` from a background listener.
pub fn install_exporter(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .install()
}

pub fn record_stage(stage: &'static str, elapsed: Duration) {
    histogram!(names::STAGE_DURATION_SECONDS, "stage" => stage).record(elapsed.as_secs_f64());
}

pub fn record_job(outcome: &'static str, error_kind: &'static str, elapsed: Duration) {
    counter!(names::JOBS_TOTAL, "outcome" => outcome, "error_kind" => error_kind).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => outcome).record(elapsed.as_secs_f64());
}

pub fn job_started() {
    gauge!(names::JOBS_IN_FLIGHT).increment(1.0);
}

pub fn job_finished() {
    gauge!(names::JOBS_IN_FLIGHT).decrement(1.0);
}
