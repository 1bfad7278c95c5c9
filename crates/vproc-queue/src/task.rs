//! Task records: the queue's own view of a job's return value.
//!
//! Stored as JSON at `vproc:task:{task_id}` with a TTL, written by the API
//! on enqueue and by the worker as the job advances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vproc_models::{JobId, JobState};

/// Coarse task status as seen by submitters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Queued,
    Started,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Started => "started",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }

    /// No further updates expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: JobId,
    pub status: TaskStatus,
    /// Last pipeline state reached
    pub state: JobState,
    #[serde(default)]
    pub published_url: String,
    #[serde(default)]
    pub error: String,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn queued(task_id: JobId) -> Self {
        Self {
            task_id,
            status: TaskStatus::Queued,
            state: JobState::Queued,
            published_url: String::new(),
            error: String::new(),
            updated_at: Utc::now(),
        }
    }

    /// Record progress into `state`.
    pub fn advance(mut self, state: JobState) -> Self {
        self.status = TaskStatus::Started;
        self.state = state;
        self.updated_at = Utc::now();
        self
    }

    pub fn succeed(mut self, published_url: impl Into<String>) -> Self {
        self.status = TaskStatus::Succeeded;
        self.state = JobState::Done;
        self.published_url = published_url.into();
        self.error.clear();
        self.updated_at = Utc::now();
        self
    }

    /// Mark failed, keeping the last state reached.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.status = TaskStatus::Failed;
        self.published_url.clear();
        self.error = error.into();
        self.updated_at = Utc::now();
        self
    }

    /// Mark failed in the state the job ended in.
    pub fn fail_in(self, state: JobState, error: impl Into<String>) -> Self {
        let mut record = self.fail(error);
        record.state = state;
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_lifecycle() {
        let id = JobId::new();
        let record = TaskRecord::queued(id.clone());
        assert_eq!(record.status, TaskStatus::Queued);
        assert!(!record.status.is_terminal());

        let record = record.advance(JobState::Transcoding);
        assert_eq!(record.status, TaskStatus::Started);

        let failed = record.clone().fail("EncodingFailed: exit status 1");
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.state, JobState::Transcoding);
        assert!(failed.status.is_terminal());

        let persisted = record.clone().fail_in(JobState::Done, "PublicationFailed: 400");
        assert_eq!(persisted.status, TaskStatus::Failed);
        assert_eq!(persisted.state, JobState::Done);
        assert!(persisted.published_url.is_empty());

        let done = record.succeed("https://res.cloudinary.com/v.mp4");
        assert_eq!(done.state, JobState::Done);
        assert_eq!(done.task_id, id);
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(TaskRecord::queued(JobId::from_string("t-1"))).unwrap();
        assert_eq!(json["task_id"], "t-1");
        assert_eq!(json["status"], "queued");
    }
}
