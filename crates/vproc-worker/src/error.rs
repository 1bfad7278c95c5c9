//! Worker error types.

use thiserror::Error;

use vproc_firestore::FirestoreError;
use vproc_media::MediaError;
use vproc_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Queue operation failed: {0}")]
    QueueFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Firestore error: {0}")]
    Firestore(#[from] FirestoreError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] vproc_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn queue_failed(msg: impl Into<String>) -> Self {
        Self::QueueFailed(msg.into())
    }
}

/// Why a job did not complete.
///
/// The display form is what ends up in `processing_error` and in task
/// records, so it leads with the kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("SourceUnavailable: {0}")]
    SourceUnavailable(String),

    #[error("NoMatchingStream: {0}")]
    NoMatchingStream(String),

    #[error("EncodingFailed: {0}")]
    EncodingFailed(String),

    #[error("PublicationFailed: {0}")]
    PublicationFailed(String),

    #[error("PersistenceFailed: {0}")]
    PersistenceFailed(String),

    /// Never changes a job's outcome.
    #[error("CleanupFailed: {0}")]
    CleanupFailed(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::SourceUnavailable(_) => "source_unavailable",
            PipelineError::NoMatchingStream(_) => "no_matching_stream",
            PipelineError::EncodingFailed(_) => "encoding_failed",
            PipelineError::PublicationFailed(_) => "publication_failed",
            PipelineError::PersistenceFailed(_) => "persistence_failed",
            PipelineError::CleanupFailed(_) => "cleanup_failed",
            PipelineError::Cancelled(_) => "cancelled",
            PipelineError::Internal(_) => "internal",
        }
    }
}

impl From<MediaError> for PipelineError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::SourceUnavailable { message } | MediaError::DownloadFailed { message } => {
                PipelineError::SourceUnavailable(message)
            }
            e @ MediaError::NoMatchingStream { .. } => PipelineError::NoMatchingStream(e.to_string()),
            e @ MediaError::EncodingFailed { .. } => PipelineError::EncodingFailed(e.diagnostic()),
            MediaError::Cancelled => PipelineError::Cancelled("soft time limit exceeded".to_string()),
            e @ MediaError::Timeout(_) => PipelineError::Cancelled(e.to_string()),
            e => PipelineError::Internal(e.to_string()),
        }
    }
}

impl From<StorageError> for PipelineError {
    fn from(e: StorageError) -> Self {
        PipelineError::PublicationFailed(e.to_string())
    }
}

impl From<FirestoreError> for PipelineError {
    fn from(e: FirestoreError) -> Self {
        PipelineError::PersistenceFailed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_error_mapping() {
        let e: PipelineError = MediaError::source_unavailable("Video unavailable").into();
        assert_eq!(e, PipelineError::SourceUnavailable("Video unavailable".into()));

        let e: PipelineError = MediaError::NoMatchingStream {
            requested: "1080p".into(),
            available: vec![360],
        }
        .into();
        assert_eq!(e.kind(), "no_matching_stream");

        let e: PipelineError = MediaError::Cancelled.into();
        assert_eq!(e.kind(), "cancelled");

        let e: PipelineError = MediaError::FfmpegNotFound.into();
        assert_eq!(e.kind(), "internal");
    }

    #[test]
    fn test_display_leads_with_kind() {
        let e: PipelineError = StorageError::UploadFailed("timeout".into()).into();
        assert!(e.to_string().starts_with("PublicationFailed: "));

        let e: PipelineError = FirestoreError::PermissionDenied("nope".into()).into();
        assert!(e.to_string().starts_with("PersistenceFailed: "));
    }
}
