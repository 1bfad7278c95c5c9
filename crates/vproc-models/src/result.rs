//! Processing results: the audit record written for every job that
//! reached transcoding.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Append-only audit record of one job's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingResult {
    pub job_id: JobId,

    /// Source reference the job was submitted with
    pub video_url: String,

    /// Public URL of the rendition, empty when publication did not succeed
    #[serde(default)]
    pub published_url: String,

    /// Size of the acquired source in bytes
    pub original_size: u64,

    /// Size of the rendition in bytes, zero on failure
    #[serde(default)]
    pub processed_size: u64,

    /// Exact encoder argument vector, recorded whether or not it succeeded
    #[serde(default)]
    pub ffmpeg_config: Vec<String>,

    /// Empty on success
    #[serde(default)]
    pub processing_error: String,

    pub created_at: DateTime<Utc>,
}

impl ProcessingResult {
    /// Start a result for a job that has acquired its source.
    pub fn new(job_id: JobId, video_url: impl Into<String>, original_size: u64) -> Self {
        Self {
            job_id,
            video_url: video_url.into(),
            published_url: String::new(),
            original_size,
            processed_size: 0,
            ffmpeg_config: Vec::new(),
            processing_error: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_ffmpeg_config(mut self, args: Vec<String>) -> Self {
        self.ffmpeg_config = args;
        self
    }

    /// Record a successful publication.
    pub fn succeed(mut self, processed_size: u64, published_url: impl Into<String>) -> Self {
        self.processed_size = processed_size;
        self.published_url = published_url.into();
        self.processing_error.clear();
        self
    }

    /// Record a failure. Any partial output size or URL is discarded.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.processed_size = 0;
        self.published_url.clear();
        self.processing_error = error.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.processing_error.is_empty() && !self.published_url.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_invariant() {
        let result = ProcessingResult::new(JobId::new(), "https://youtu.be/abc", 1024)
            .succeed(512, "https://cdn.example.com/videos/x.mp4");
        assert!(result.is_success());
        assert_eq!(result.processed_size, 512);
    }

    #[test]
    fn test_failure_zeroes_processed_size() {
        let result = ProcessingResult::new(JobId::new(), "https://youtu.be/abc", 1024)
            .succeed(512, "https://cdn.example.com/videos/x.mp4")
            .fail("upload rejected");
        assert!(!result.is_success());
        assert_eq!(result.processed_size, 0);
        assert!(result.published_url.is_empty());
        assert_eq!(result.original_size, 1024);
    }
}
