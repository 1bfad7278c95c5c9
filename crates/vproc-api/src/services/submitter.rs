//! Turns validated descriptors into queued jobs.
//!
//! Both the HTTP endpoint and the change-feed listener submit through here.

use std::sync::Arc;

use tracing::info;

use vproc_models::{JobDescriptor, JobOrigin};
use vproc_queue::{JobDispatch, QueueResult, TaskRecord, TranscodeVideoJob};

use crate::metrics;

#[derive(Clone)]
pub struct Submitter {
    dispatch: Arc<dyn JobDispatch>,
}

impl Submitter {
    pub fn new(dispatch: Arc<dyn JobDispatch>) -> Self {
        Self { dispatch }
    }

    /// Enqueue a job and return its initial task record.
    pub async fn submit(&self, descriptor: JobDescriptor, origin: JobOrigin) -> QueueResult<TaskRecord> {
        let job = TranscodeVideoJob::new(descriptor, origin);
        let job_id = job.job_id.clone();
        let source = job.descriptor.source_reference.clone();

        let record = self.dispatch.dispatch(job).await?;
        metrics::record_submission(origin.as_str());
        info!(
            task_id = %job_id,
            origin = origin.as_str(),
            source = %source,
            "Job submitted"
        );
        Ok(record)
    }

    /// Look up a task record by its token.
    pub async fn task(&self, task_id: &str) -> QueueResult<Option<TaskRecord>> {
        self.dispatch.task(task_id).await
    }

    /// Messages waiting in the job stream.
    pub async fn depth(&self) -> QueueResult<u64> {
        self.dispatch.depth().await
    }
}
