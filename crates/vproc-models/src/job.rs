//! Job identity and the per-job state machine.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a job.
///
/// Doubles as the task token returned to submitters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a job was submitted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobOrigin {
    /// Synchronous HTTP submission
    #[default]
    Http,
    /// Insert observed on the submission change feed
    ChangeFeed,
}

impl JobOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOrigin::Http => "http",
            JobOrigin::ChangeFeed => "change_feed",
        }
    }
}

/// Pipeline state of a single job.
///
/// ```text
/// Queued -> Acquiring -> Transcoding -> Publishing -> Persisting -> Done
///              |             |              |              ^
///              v             v              v              |
///            Failed        Failed ------- Failed ----------+
/// ```
///
/// Acquisition failures end the job: there is nothing to persist.
/// Failures during Transcoding or Publishing route through Persisting to
/// `Done`; the failure itself travels with the job's error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Queued,
    Acquiring,
    Transcoding,
    Publishing,
    Persisting,
    Done,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Acquiring => "acquiring",
            JobState::Transcoding => "transcoding",
            JobState::Publishing => "publishing",
            JobState::Persisting => "persisting",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }

    /// Whether the job may have ended in this state.
    ///
    /// `Failed` is only final when it was entered from `Acquiring`;
    /// otherwise it moves on to `Persisting`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Queued, Acquiring)
                | (Acquiring, Transcoding)
                | (Acquiring, Failed)
                | (Transcoding, Publishing)
                | (Transcoding, Failed)
                | (Publishing, Persisting)
                | (Publishing, Failed)
                | (Failed, Persisting)
                | (Persisting, Done)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
