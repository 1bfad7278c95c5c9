//! Redis Streams job queue.
//!
//! This crate provides:
//! - Job enqueueing via Redis Streams
//! - Consumer-group reads with crash recovery and a DLQ
//! - Task records holding each job's queue-side status

pub mod error;
pub mod job;
pub mod queue;
pub mod task;

pub use error::{QueueError, QueueResult};
pub use job::{QueueJob, TranscodeVideoJob};
pub use queue::{Delivery, JobDispatch, JobQueue, QueueConfig, TaskStore};
pub use task::{TaskRecord, TaskStatus};
