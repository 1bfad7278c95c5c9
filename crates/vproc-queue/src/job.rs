//! Job types for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vproc_models::{JobDescriptor, JobId, JobOrigin};

/// Job to acquire, transcode, publish and record one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeVideoJob {
    /// Unique job ID, also the task token handed back to the submitter
    pub job_id: JobId,
    pub descriptor: JobDescriptor,
    pub origin: JobOrigin,
    pub enqueued_at: DateTime<Utc>,
}

impl TranscodeVideoJob {
    /// Create a new job with a fresh ID.
    pub fn new(descriptor: JobDescriptor, origin: JobOrigin) -> Self {
        Self {
            job_id: JobId::new(),
            descriptor,
            origin,
            enqueued_at: Utc::now(),
        }
    }
}

/// Generic job wrapper for queue storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    TranscodeVideo(TranscodeVideoJob),
}

impl QueueJob {
    pub fn job_id(&self) -> &JobId {
        match self {
            QueueJob::TranscodeVideo(j) => &j.job_id,
        }
    }

    pub fn origin(&self) -> JobOrigin {
        match self {
            QueueJob::TranscodeVideo(j) => j.origin,
        }
    }
}

impl From<TranscodeVideoJob> for QueueJob {
    fn from(job: TranscodeVideoJob) -> Self {
        QueueJob::TranscodeVideo(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_job_wire_format() {
        let descriptor = JobDescriptor::new("https://youtu.be/abc", None, None).unwrap();
        let job = TranscodeVideoJob::new(descriptor, JobOrigin::ChangeFeed);

        let json = serde_json::to_value(QueueJob::from(job.clone())).expect("serialize QueueJob");
        assert_eq!(json["type"], "transcode_video");
        assert_eq!(json["origin"], "change_feed");
        assert_eq!(json["descriptor"]["preferred_resolution"], "360p");

        let decoded: QueueJob = serde_json::from_value(json).expect("deserialize QueueJob");
        assert_eq!(decoded.job_id(), &job.job_id);
        assert_eq!(decoded.origin(), JobOrigin::ChangeFeed);
    }
}
