//! Services shared by the HTTP handlers and background tasks.

pub mod feed_listener;
pub mod submitter;

pub use feed_listener::{FeedConfig, FeedListenerError, SubmissionFeedListener};
pub use submitter::Submitter;
