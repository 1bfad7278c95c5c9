//! Job runner: drives one job through the pipeline states.
//!
//! ```text
//! Queued -> Acquiring -> Transcoding -> Publishing -> Persisting -> Done
//!               |             |             |              ^
//!               v             +---> Failed -+              |
//!             Failed                   |                   |
//!                                      +-------------------+
//! ```
//!
//! Acquisition failures end the job with nothing persisted. Once a source is
//! on disk, exactly one processing result is recorded whatever happens after
//! and the job ends in `Done`, with any failure kept in the outcome's error.
//! Transient files are swept on every path out of [`JobRunner::run`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::Instrument;

use vproc_firestore::ResultSink;
use vproc_media::command::wait_cancelled;
use vproc_media::{SourceFetcher, Transcoder};
use vproc_models::{CatalogEntry, EncodingProfile, JobId, JobState, ProcessingResult};
use vproc_queue::TranscodeVideoJob;
use vproc_storage::MediaStore;

use crate::error::PipelineError;
use crate::logging::JobLogger;
use crate::metrics;
use crate::workspace::JobWorkspace;

/// Observer of state transitions.
#[async_trait]
pub trait StateListener: Send + Sync {
    async fn on_transition(&self, job_id: &JobId, state: JobState);
}

/// Listener that ignores transitions.
pub struct NoopListener;

#[async_trait]
impl StateListener for NoopListener {
    async fn on_transition(&self, _job_id: &JobId, _state: JobState) {}
}

/// Stage implementations used by the runner.
#[derive(Clone)]
pub struct PipelineStages {
    pub fetcher: Arc<dyn SourceFetcher>,
    pub transcoder: Arc<dyn Transcoder>,
    pub store: Arc<dyn MediaStore>,
    pub sink: Arc<dyn ResultSink>,
}

/// How a job ended.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: JobId,
    /// `Done` once the job reached persistence, `Failed` if it ended before
    pub state: JobState,
    /// Last non-terminal state reached
    pub last_stage: JobState,
    pub published_url: Option<String>,
    pub error: Option<PipelineError>,
    /// The result handed to the sink, if the job got that far
    pub result: Option<ProcessingResult>,
    pub catalog_recorded: bool,
    pub cleanup_failures: Vec<PipelineError>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub struct JobRunner {
    stages: PipelineStages,
    profile: EncodingProfile,
    work_dir: PathBuf,
    soft_time_limit: Duration,
}

impl JobRunner {
    pub fn new(stages: PipelineStages, work_dir: impl Into<PathBuf>, soft_time_limit: Duration) -> Self {
        Self {
            stages,
            profile: EncodingProfile::default(),
            work_dir: work_dir.into(),
            soft_time_limit,
        }
    }

    pub fn soft_time_limit(&self) -> Duration {
        self.soft_time_limit
    }

    /// Run a job to completion.
    ///
    /// Never returns an error: every failure is captured in the outcome.
    pub async fn run(&self, job: &TranscodeVideoJob, listener: &dyn StateListener) -> JobOutcome {
        let logger = JobLogger::new(&job.job_id, job.origin);
        let span = logger.create_span();

        async {
            let started = Instant::now();
            logger.log_start(&job.descriptor.source_reference);
            metrics::job_started();

            let outcome = match JobWorkspace::create(&self.work_dir).await {
                Ok(mut workspace) => {
                    let mut outcome = self.run_in(job, &workspace, &logger, listener).await;
                    outcome.cleanup_failures = workspace.sweep().await;
                    outcome
                }
                Err(e) => {
                    let error = PipelineError::internal(format!(
                        "cannot prepare {}: {}",
                        self.work_dir.display(),
                        e
                    ));
                    logger.log_error(JobState::Queued, &error.to_string());
                    JobOutcome {
                        job_id: job.job_id.clone(),
                        state: JobState::Failed,
                        last_stage: JobState::Queued,
                        published_url: None,
                        error: Some(error),
                        result: None,
                        catalog_recorded: false,
                        cleanup_failures: Vec::new(),
                    }
                }
            };

            metrics::job_finished();
            metrics::record_job(
                if outcome.is_success() { "succeeded" } else { "failed" },
                outcome.error.as_ref().map(|e| e.kind()).unwrap_or("none"),
                started.elapsed(),
            );
            logger.log_completion(outcome.state, started.elapsed().as_millis() as u64);
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run_in(
        &self,
        job: &TranscodeVideoJob,
        workspace: &JobWorkspace,
        logger: &JobLogger,
        listener: &dyn StateListener,
    ) -> JobOutcome {
        let descriptor = &job.descriptor;
        let mut tracker = StateTracker {
            job_id: &job.job_id,
            state: JobState::Queued,
            last_stage: JobState::Queued,
            logger,
            listener,
        };
        let mut outcome = JobOutcome {
            job_id: job.job_id.clone(),
            state: JobState::Failed,
            last_stage: JobState::Queued,
            published_url: None,
            error: None,
            result: None,
            catalog_recorded: false,
            cleanup_failures: Vec::new(),
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let soft_limit = self.soft_time_limit;
        let timer = AbortOnDrop(tokio::spawn(async move {
            tokio::time::sleep(soft_limit).await;
            let _ = cancel_tx.send(true);
        }));

        // Acquisition
        tracker.to(JobState::Acquiring).await;
        let stage_start = Instant::now();
        let acquired = guarded(self.stages.fetcher.fetch(
            &descriptor.source_reference,
            descriptor.preferred_resolution,
            &workspace.source_stem(),
            cancel_rx.clone(),
        ))
        .await;
        metrics::record_stage("acquiring", stage_start.elapsed());

        let acquired = match acquired {
            Ok(a) => a,
            Err(e) => {
                logger.log_error(JobState::Acquiring, &e.to_string());
                tracker.to(JobState::Failed).await;
                outcome.last_stage = tracker.last_stage;
                outcome.error = Some(e);
                return outcome;
            }
        };

        // Transcoding
        tracker.to(JobState::Transcoding).await;
        let rendition = workspace.rendition_path();
        let command_line = self
            .stages
            .transcoder
            .command_line(&acquired.path, &rendition, &self.profile);
        let result = ProcessingResult::new(
            job.job_id.clone(),
            descriptor.source_reference.clone(),
            acquired.size_bytes,
        )
        .with_ffmpeg_config(command_line);

        let stage_start = Instant::now();
        let encoded = guarded(self.stages.transcoder.transcode(
            &acquired.path,
            &rendition,
            &self.profile,
            cancel_rx.clone(),
        ))
        .await;
        metrics::record_stage("transcoding", stage_start.elapsed());

        // Publication
        let published = match encoded {
            Ok(size) => {
                tracker.to(JobState::Publishing).await;
                let stage_start = Instant::now();
                let mut cancel = cancel_rx.clone();
                let published = tokio::select! {
                    r = guarded(self.stages.store.publish(&rendition, &descriptor.target_identifier)) => r,
                    _ = wait_cancelled(Some(&mut cancel)) => Err(PipelineError::Cancelled(
                        "soft time limit exceeded".to_string(),
                    )),
                };
                metrics::record_stage("publishing", stage_start.elapsed());
                published.and_then(|asset| {
                    if asset.secure_url.trim().is_empty() {
                        Err(PipelineError::PublicationFailed(
                            "store returned no secure_url".to_string(),
                        ))
                    } else {
                        Ok((asset, size))
                    }
                })
            }
            Err(e) => Err(e),
        };
        drop(timer);

        let (result, catalog, stage_error) = match published {
            Ok((asset, size)) => {
                let catalog = descriptor.provenance.as_ref().map(|provenance| {
                    CatalogEntry::from_parts(
                        &acquired.info,
                        provenance,
                        descriptor.source_reference.clone(),
                        asset.secure_url.clone(),
                        asset.hls_url.clone(),
                    )
                });
                outcome.published_url = Some(asset.secure_url.clone());
                (result.succeed(size, asset.secure_url), catalog, None)
            }
            Err(e) => {
                logger.log_error(tracker.state, &e.to_string());
                tracker.to(JobState::Failed).await;
                (result.fail(e.to_string()), None, Some(e))
            }
        };

        // Persistence
        tracker.to(JobState::Persisting).await;
        let stage_start = Instant::now();
        let persisted = guarded(self.stages.sink.record(&result, catalog.as_ref())).await;
        metrics::record_stage("persisting", stage_start.elapsed());

        outcome.last_stage = tracker.last_stage;
        let error = match persisted {
            Ok(()) => {
                outcome.catalog_recorded = catalog.is_some();
                stage_error
            }
            Err(e) => {
                logger.log_error(JobState::Persisting, &e.to_string());
                Some(e)
            }
        };
        tracker.to(JobState::Done).await;
        outcome.state = JobState::Done;
        if error.is_some() {
            outcome.published_url = None;
        }
        outcome.error = error;
        outcome.result = Some(result);
        outcome
    }
}

/// Aborts the soft-limit timer when the job finishes or is dropped.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct StateTracker<'a> {
    job_id: &'a JobId,
    state: JobState,
    last_stage: JobState,
    logger: &'a JobLogger,
    listener: &'a dyn StateListener,
}

impl StateTracker<'_> {
    async fn to(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        if !self.state.can_transition_to(next) {
            self.logger
                .log_warning(&format!("unexpected transition {} -> {}", self.state, next));
        }
        self.logger.log_transition(self.state, next);
        self.state = next;
        if !next.is_terminal() && next != JobState::Failed {
            self.last_stage = next;
        }
        self.listener.on_transition(self.job_id, next).await;
    }
}

/// Await a stage, turning its error and any panic into a [`PipelineError`].
async fn guarded<T, E, F>(stage: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<PipelineError>,
{
    match AssertUnwindSafe(stage).catch_unwind().await {
        Ok(result) => result.map_err(Into::into),
        Err(panic) => Err(PipelineError::internal(format!(
            "stage panicked: {}",
            panic_message(&panic)
        ))),
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
