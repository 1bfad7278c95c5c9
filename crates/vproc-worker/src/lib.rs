//! Transcode job worker.
//!
//! This crate provides:
//! - Job runner driving acquisition, transcoding, publication and persistence
//! - Per-job transient file tracking
//! - Queue executor with soft and hard time limits
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod runner;
pub mod workspace;

pub use config::WorkerConfig;
pub use error::{PipelineError, WorkerError, WorkerResult};
pub use executor::{JobExecutor, Settlement, TaskRecordListener};
pub use logging::JobLogger;
pub use runner::{JobOutcome, JobRunner, NoopListener, PipelineStages, StateListener};
pub use workspace::JobWorkspace;
