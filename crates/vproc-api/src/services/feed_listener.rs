//! Change-feed listener.
//!
//! Polls the submission feed from a persisted cursor and enqueues one job per
//! new document. Runs as a supervised background task: a failed or panicked
//! poll loop is restarted with exponential backoff, and request handling is
//! never affected by it.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use vproc_firestore::{CursorStore, FeedCursor, FeedDocument, FirestoreError, SubmissionSource};
use vproc_models::JobOrigin;
use vproc_queue::QueueError;

use crate::config::env_parse;
use crate::metrics;
use crate::services::Submitter;

/// Change-feed listener configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Start the listener with the API server
    pub enabled: bool,
    /// Key of this listener's cursor document
    pub listener_name: String,
    /// Delay between polls once the feed is drained
    pub poll_interval: Duration,
    /// Documents read per poll
    pub batch_size: u32,
    /// First restart delay after a failure
    pub initial_backoff: Duration,
    /// Restart delay cap
    pub max_backoff: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listener_name: "submissions".to_string(),
            poll_interval: Duration::from_secs(5),
            batch_size: 50,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl FeedConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: std::env::var("FEED_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.enabled),
            listener_name: std::env::var("FEED_LISTENER_NAME").unwrap_or(defaults.listener_name),
            poll_interval: env_parse("FEED_POLL_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            batch_size: env_parse::<u32>("FEED_BATCH_SIZE")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.batch_size),
            initial_backoff: env_parse("FEED_INITIAL_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_backoff),
            max_backoff: env_parse("FEED_MAX_BACKOFF_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_backoff),
        }
    }
}

#[derive(Debug, Error)]
pub enum FeedListenerError {
    #[error("Feed error: {0}")]
    Feed(#[from] FirestoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Listener panicked: {0}")]
    Panicked(String),
}

struct ListenerCore {
    config: FeedConfig,
    source: Arc<dyn SubmissionSource>,
    cursors: Arc<dyn CursorStore>,
    submitter: Submitter,
}

/// Background listener over the submission feed.
pub struct SubmissionFeedListener {
    core: Arc<ListenerCore>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SubmissionFeedListener {
    pub fn new(
        config: FeedConfig,
        source: Arc<dyn SubmissionSource>,
        cursors: Arc<dyn CursorStore>,
        submitter: Submitter,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            core: Arc::new(ListenerCore {
                config,
                source,
                cursors,
                submitter,
            }),
            shutdown,
            handle: Mutex::new(None),
        }
    }

    /// Spawn the supervised poll loop. Does nothing if already running.
    pub fn start(&self) {
        let Ok(mut handle) = self.handle.lock() else {
            return;
        };
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        self.shutdown.send_replace(false);
        let core = Arc::clone(&self.core);
        let shutdown_rx = self.shutdown.subscribe();
        info!(
            listener = %core.config.listener_name,
            "Starting change-feed listener"
        );
        *handle = Some(tokio::spawn(supervise(core, shutdown_rx)));
    }

    /// Signal the loop to stop and wait for it to exit.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Change-feed listener task ended abnormally: {}", e);
            }
        }
        info!(listener = %self.core.config.listener_name, "Change-feed listener stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .map(|h| h.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Read one batch after `cursor`, submitting each well-formed document.
    ///
    /// Returns how many documents the cursor moved past.
    pub async fn poll_once(&self, cursor: &mut FeedCursor) -> Result<usize, FeedListenerError> {
        self.core.poll_once(cursor).await
    }
}

impl ListenerCore {
    async fn load_cursor(&self) -> Result<FeedCursor, FeedListenerError> {
        let name = &self.config.listener_name;
        if let Some(cursor) = self.cursors.load(name).await? {
            debug!(listener = %name, created_at = %cursor.created_at, "Resuming from saved cursor");
            return Ok(cursor);
        }
        // First start: only documents inserted from now on.
        let cursor = FeedCursor::starting_at(Utc::now());
        self.cursors.save(name, &cursor).await?;
        info!(listener = %name, "No saved cursor, starting at {}", cursor.created_at);
        Ok(cursor)
    }

    async fn poll_once(&self, cursor: &mut FeedCursor) -> Result<usize, FeedListenerError> {
        let documents = self
            .source
            .poll(cursor, self.config.batch_size)
            .await?;
        let count = documents.len();

        for document in documents {
            // Already handled; the cursor never moves back.
            if document.position <= *cursor {
                debug!(document = document.document_id(), "Skipping document at or before cursor");
                continue;
            }
            self.handle_document(&document).await?;
            *cursor = document.position;
            self.cursors.save(&self.config.listener_name, cursor).await?;
        }

        Ok(count)
    }

    async fn handle_document(&self, document: &FeedDocument) -> Result<(), FeedListenerError> {
        let record = match &document.record {
            Ok(record) => record.clone(),
            Err(e) => {
                warn!(document = document.document_id(), "Skipping malformed submission: {}", e);
                metrics::record_feed_document("malformed");
                return Ok(());
            }
        };

        let descriptor = match record.into_descriptor() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(document = document.document_id(), "Skipping invalid submission: {}", e);
                metrics::record_feed_document("malformed");
                return Ok(());
            }
        };

        self.submitter.submit(descriptor, JobOrigin::ChangeFeed).await?;
        metrics::record_feed_document("submitted");
        Ok(())
    }

    /// Poll until shutdown. Errors end the run so the supervisor can restart it.
    async fn run(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
        backoff: &mut Duration,
    ) -> Result<(), FeedListenerError> {
        let mut cursor = self.load_cursor().await?;

        loop {
            if *shutdown_rx.borrow() {
                return Ok(());
            }

            let consumed = self.poll_once(&mut cursor).await?;
            *backoff = self.config.initial_backoff;

            // A full batch means there may be more waiting.
            if consumed as u32 >= self.config.batch_size {
                continue;
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }
}

async fn supervise(core: Arc<ListenerCore>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut backoff = core.config.initial_backoff;

    loop {
        let outcome = AssertUnwindSafe(core.run(&mut shutdown_rx, &mut backoff))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(FeedListenerError::Panicked(message))
            });

        match outcome {
            Ok(()) => break,
            Err(e) => {
                error!(
                    listener = %core.config.listener_name,
                    "Change-feed listener failed, restarting in {:?}: {}", backoff, e
                );
                metrics::record_feed_restart();
            }
        }

        tokio::select! {
            _ = shutdown_rx.changed() => {}
            _ = tokio::time::sleep(backoff) => {}
        }
        if *shutdown_rx.borrow() {
            break;
        }
        backoff = (backoff * 2).min(core.config.max_backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use vproc_firestore::{FirestoreResult, MalformedSubmission, SubmissionRecord};
    use vproc_models::ProvenanceMetadata;

    use crate::services::submitter::tests::FakeDispatch;

    struct FakeSource {
        documents: Vec<FeedDocument>,
        failures_left: AtomicUsize,
        polls: AtomicUsize,
        ignore_cursor: bool,
    }

    impl FakeSource {
        fn new(documents: Vec<FeedDocument>) -> Self {
            Self {
                documents,
                failures_left: AtomicUsize::new(0),
                polls: AtomicUsize::new(0),
                ignore_cursor: false,
            }
        }

        /// Return every document on each poll, whatever the cursor.
        fn ignoring_cursor(mut self) -> Self {
            self.ignore_cursor = true;
            self
        }

        fn failing_first(self, n: usize) -> Self {
            self.failures_left.store(n, Ordering::SeqCst);
            self
        }
    }

    #[async_trait]
    impl SubmissionSource for FakeSource {
        async fn poll(&self, after: &FeedCursor, limit: u32) -> FirestoreResult<Vec<FeedDocument>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(FirestoreError::request_failed("connection reset"));
            }
            Ok(self
                .documents
                .iter()
                .filter(|d| self.ignore_cursor || d.position > *after)
                .take(limit as usize)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct MemoryCursors {
        saved: std::sync::Mutex<HashMap<String, FeedCursor>>,
    }

    impl MemoryCursors {
        fn get(&self, listener: &str) -> Option<FeedCursor> {
            self.saved.lock().unwrap().get(listener).cloned()
        }
    }

    #[async_trait]
    impl CursorStore for MemoryCursors {
        async fn load(&self, listener: &str) -> FirestoreResult<Option<FeedCursor>> {
            Ok(self.get(listener))
        }

        async fn save(&self, listener: &str, cursor: &FeedCursor) -> FirestoreResult<()> {
            self.saved
                .lock()
                .unwrap()
                .insert(listener.to_string(), cursor.clone());
            Ok(())
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn document(secs: i64, id: &str, record: Result<SubmissionRecord, MalformedSubmission>) -> FeedDocument {
        FeedDocument {
            position: FeedCursor {
                created_at: at(secs),
                document_name: Some(format!(
                    "projects/p/databases/(default)/documents/youtube_videos/{}",
                    id
                )),
            },
            record,
        }
    }

    fn submission(url: &str) -> SubmissionRecord {
        SubmissionRecord {
            video_url: url.to_string(),
            public_id: None,
            preferred_resolution: None,
            provenance: ProvenanceMetadata {
                publisher_id: "pub-1".to_string(),
                publisher_avatar: "https://cdn.example.com/a.png".to_string(),
                publisher_name: "Publisher".to_string(),
                publisher_topic: "news".to_string(),
                language: "en".to_string(),
                country: "US".to_string(),
            },
        }
    }

    fn config() -> FeedConfig {
        FeedConfig {
            listener_name: "test".to_string(),
            poll_interval: Duration::from_millis(10),
            batch_size: 10,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            ..FeedConfig::default()
        }
    }

    struct Fixture {
        listener: SubmissionFeedListener,
        dispatch: Arc<FakeDispatch>,
        cursors: Arc<MemoryCursors>,
    }

    fn fixture(source: FakeSource) -> Fixture {
        let dispatch = Arc::new(FakeDispatch::default());
        let cursors = Arc::new(MemoryCursors::default());
        let listener = SubmissionFeedListener::new(
            config(),
            Arc::new(source),
            cursors.clone(),
            Submitter::new(dispatch.clone()),
        );
        Fixture {
            listener,
            dispatch,
            cursors,
        }
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_poll_submits_valid_and_skips_malformed() {
        let f = fixture(FakeSource::new(vec![
            document(1, "a", Ok(submission("https://example.com/a"))),
            document(2, "b", Err(MalformedSubmission("publisher_id"))),
            document(3, "c", Ok(submission("https://example.com/c"))),
        ]));

        let mut cursor = FeedCursor::starting_at(at(0));
        let consumed = f.listener.poll_once(&mut cursor).await.unwrap();

        assert_eq!(consumed, 3);
        let jobs = f.dispatch.jobs();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.origin == JobOrigin::ChangeFeed));
        assert!(jobs.iter().all(|j| j.descriptor.has_provenance()));
        assert_eq!(jobs[1].descriptor.source_reference, "https://example.com/c");

        // Cursor moved past the malformed document too, and was persisted.
        assert_eq!(cursor.created_at, at(3));
        assert_eq!(f.cursors.get("test"), Some(cursor));
    }

    #[tokio::test]
    async fn test_repeated_documents_are_not_requeued() {
        let f = fixture(
            FakeSource::new(vec![
                document(1, "a", Ok(submission("https://example.com/a"))),
                document(2, "b", Ok(submission("https://example.com/b"))),
            ])
            .ignoring_cursor(),
        );

        let mut cursor = FeedCursor::starting_at(at(0));
        f.listener.poll_once(&mut cursor).await.unwrap();
        let after_first = cursor.clone();
        assert_eq!(f.dispatch.jobs().len(), 2);

        f.listener.poll_once(&mut cursor).await.unwrap();
        assert_eq!(f.dispatch.jobs().len(), 2);
        assert_eq!(cursor, after_first);
        assert_eq!(f.cursors.get("test"), Some(after_first));
    }

    #[tokio::test]
    async fn test_earlier_document_never_rewinds_cursor() {
        let f = fixture(
            FakeSource::new(vec![document(1, "late", Ok(submission("https://example.com/late")))])
                .ignoring_cursor(),
        );

        let start = FeedCursor::starting_at(at(5));
        let mut cursor = start.clone();
        f.listener.poll_once(&mut cursor).await.unwrap();

        assert!(f.dispatch.jobs().is_empty());
        assert_eq!(cursor, start);
    }

    #[tokio::test]
    async fn test_invalid_resolution_is_skipped() {
        let mut bad = submission("https://example.com/bad");
        bad.preferred_resolution = Some("hd".to_string());
        let f = fixture(FakeSource::new(vec![document(1, "a", Ok(bad))]));

        let mut cursor = FeedCursor::starting_at(at(0));
        assert_eq!(f.listener.poll_once(&mut cursor).await.unwrap(), 1);
        assert!(f.dispatch.jobs().is_empty());
        assert_eq!(cursor.created_at, at(1));
    }

    #[tokio::test]
    async fn test_queue_failure_keeps_cursor_on_document() {
        let f = fixture(FakeSource::new(vec![
            document(1, "a", Ok(submission("https://example.com/a"))),
        ]));
        f.dispatch.set_unavailable(true);

        let start = FeedCursor::starting_at(at(0));
        let mut cursor = start.clone();
        let result = f.listener.poll_once(&mut cursor).await;

        assert!(matches!(result, Err(FeedListenerError::Queue(_))));
        assert_eq!(cursor, start);
        assert!(f.cursors.get("test").is_none());
    }

    #[tokio::test]
    async fn test_listener_resumes_from_saved_cursor() {
        let f = fixture(FakeSource::new(vec![
            document(1, "old", Ok(submission("https://example.com/old"))),
            document(5, "new", Ok(submission("https://example.com/new"))),
        ]));
        f.cursors
            .save("test", &FeedCursor::starting_at(at(2)))
            .await
            .unwrap();

        f.listener.start();
        assert!(f.listener.is_running());
        let dispatch = f.dispatch.clone();
        wait_for(|| !dispatch.jobs().is_empty()).await;
        f.listener.stop().await;

        let jobs = f.dispatch.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].descriptor.source_reference, "https://example.com/new");
        assert!(!f.listener.is_running());
    }

    #[tokio::test]
    async fn test_first_start_skips_existing_documents() {
        let f = fixture(FakeSource::new(vec![document(
            -60,
            "before",
            Ok(submission("https://example.com/before")),
        )]));

        f.listener.start();
        let cursors = f.cursors.clone();
        wait_for(|| cursors.get("test").is_some()).await;
        f.listener.stop().await;

        assert!(f.dispatch.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_listener_restarts_after_feed_errors() {
        let f = fixture(
            FakeSource::new(vec![document(
                1,
                "a",
                Ok(submission("https://example.com/a")),
            )])
            .failing_first(2),
        );
        f.cursors
            .save("test", &FeedCursor::starting_at(at(0)))
            .await
            .unwrap();

        f.listener.start();
        let dispatch = f.dispatch.clone();
        wait_for(|| dispatch.jobs().len() == 1).await;
        f.listener.stop().await;

        assert_eq!(f.dispatch.jobs().len(), 1);
    }

    #[test]
    fn test_backoff_defaults() {
        let config = FeedConfig::default();
        assert!(config.initial_backoff < config.max_backoff);
        assert!(config.batch_size > 0);
    }
}
