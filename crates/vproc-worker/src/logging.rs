//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for job processing with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};
use vproc_models::{JobId, JobOrigin, JobState};

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    origin: JobOrigin,
}

impl JobLogger {
    pub fn new(job_id: &JobId, origin: JobOrigin) -> Self {
        Self {
            job_id: job_id.to_string(),
            origin,
        }
    }

    /// Log the start of a job.
    pub fn log_start(&self, source_reference: &str) {
        info!(
            job_id = %self.job_id,
            origin = self.origin.as_str(),
            source = %source_reference,
            "Job started"
        );
    }

    /// Log a state transition.
    pub fn log_transition(&self, from: JobState, to: JobState) {
        info!(
            job_id = %self.job_id,
            from = from.as_str(),
            to = to.as_str(),
            "Job state transition"
        );
    }

    /// Log a warning during job execution.
    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, "Job warning: {}", message);
    }

    /// Log a stage failure.
    pub fn log_error(&self, stage: JobState, message: &str) {
        error!(
            job_id = %self.job_id,
            stage = stage.as_str(),
            "Job error: {}", message
        );
    }

    /// Log the end of a job.
    pub fn log_completion(&self, state: JobState, elapsed_ms: u64) {
        info!(
            job_id = %self.job_id,
            state = state.as_str(),
            elapsed_ms,
            "Job finished"
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            origin = self.origin.as_str()
        )
    }
}
