//! Firestore REST API client.
//!
//! This crate provides:
//! - Processing result and catalog repositories
//! - The submission change feed and its persisted cursors
//! - Service account authentication via gcp_auth (static token for the emulator)
//! - Bounded retry for transport failures

pub mod auth;
pub mod catalog_repo;
pub mod client;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod results_repo;
pub mod retry;
pub mod sink;
pub mod types;

pub use auth::AccessToken;
pub use catalog_repo::{CatalogRepository, CATALOG_COLLECTION};
pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use feed::{
    CursorStore, FeedCursor, FeedCursorRepository, FeedDocument, MalformedSubmission,
    SubmissionFeed, SubmissionRecord, SubmissionSource, CURSOR_COLLECTION, FEED_COLLECTION,
};
pub use results_repo::{ProcessingResultRepository, RESULTS_COLLECTION};
pub use retry::RetryConfig;
pub use sink::{FirestoreResultSink, ResultSink};
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
