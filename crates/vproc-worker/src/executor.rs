//! Job executor.
//!
//! Pulls jobs from the stream, runs each on its own task under a
//! concurrency limit, and settles it: a task record is written and the
//! message is acked. Pipeline failures are terminal; nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vproc_models::{JobId, JobState};
use vproc_queue::{Delivery, JobQueue, QueueJob, TaskRecord, TaskStore, TranscodeVideoJob};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::runner::{JobOutcome, JobRunner, StateListener};

pub const HARD_LIMIT_MESSAGE: &str = "hard time limit exceeded";

/// How the executor saw a job end.
#[derive(Debug)]
pub enum Settlement {
    Completed(JobOutcome),
    /// The job future was dropped at the hard limit.
    HardTimeout,
}

/// Run a job under the hard time limit.
pub async fn execute(
    runner: &JobRunner,
    job: &TranscodeVideoJob,
    hard_limit: Duration,
    listener: &dyn StateListener,
) -> Settlement {
    match tokio::time::timeout(hard_limit, runner.run(job, listener)).await {
        Ok(outcome) => Settlement::Completed(outcome),
        Err(_) => {
            error!(job_id = %job.job_id, "Job exceeded hard time limit, dropped");
            metrics::job_finished();
            metrics::record_job("failed", "hard_time_limit", hard_limit);
            Settlement::HardTimeout
        }
    }
}

/// Final task record for a settled job.
pub fn final_record(current: TaskRecord, settlement: &Settlement) -> TaskRecord {
    match settlement {
        Settlement::Completed(outcome) if outcome.is_success() => {
            current.succeed(outcome.published_url.clone().unwrap_or_default())
        }
        Settlement::Completed(outcome) => current.fail_in(
            outcome.state,
            outcome
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "job failed".to_string()),
        ),
        Settlement::HardTimeout => current.fail(HARD_LIMIT_MESSAGE),
    }
}

/// Mirrors state transitions into the job's task record.
pub struct TaskRecordListener {
    store: Arc<dyn TaskStore>,
    record: Mutex<TaskRecord>,
}

impl TaskRecordListener {
    pub fn new(store: Arc<dyn TaskStore>, job_id: JobId) -> Self {
        Self {
            store,
            record: Mutex::new(TaskRecord::queued(job_id)),
        }
    }

    pub async fn current(&self) -> TaskRecord {
        self.record.lock().await.clone()
    }
}

#[async_trait]
impl StateListener for TaskRecordListener {
    async fn on_transition(&self, job_id: &JobId, state: JobState) {
        // Terminal records are written once the job settles.
        if state.is_terminal() {
            return;
        }
        let mut record = self.record.lock().await;
        *record = record.clone().advance(state);
        if let Err(e) = self.store.put_task(&record).await {
            warn!(job_id = %job_id, "Failed to update task record: {}", e);
        }
    }
}

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    runner: Arc<JobRunner>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(config: WorkerConfig, queue: JobQueue, runner: JobRunner) -> WorkerResult<Self> {
        config.validate()?;
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Ok(Self {
            config,
            queue: Arc::new(queue),
            runner: Arc::new(runner),
            job_semaphore,
            shutdown,
            consumer_name,
        })
    }

    /// Start the executor. Returns after shutdown once in-flight jobs drain.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_task = self.spawn_claim_loop();

        // Main job consumption loop
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        // Back off on error
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "Shutdown timeout reached with {} jobs still running",
                self.config.max_concurrent_jobs - self.job_semaphore.available_permits()
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Periodically claim messages left pending by crashed workers.
    fn spawn_claim_loop(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let runner = Arc::clone(&self.runner);
        let semaphore = Arc::clone(&self.job_semaphore);
        let consumer_name = self.consumer_name.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.claim_interval);
            let min_idle_ms = config.claim_min_idle.as_millis() as u64;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let available = semaphore.available_permits();
                        if available == 0 {
                            continue;
                        }
                        match queue.claim_pending(&consumer_name, min_idle_ms, available).await {
                            Ok(deliveries) if !deliveries.is_empty() => {
                                info!("Claimed {} pending jobs", deliveries.len());
                                for delivery in deliveries {
                                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                        break;
                                    };
                                    let queue = Arc::clone(&queue);
                                    let runner = Arc::clone(&runner);
                                    let config = config.clone();
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_delivery(&config, runner, queue, delivery).await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Failed to claim pending jobs: {}", e),
                        }
                    }
                }
            }
        })
    }

    /// Consume and start jobs from the queue.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            // All slots busy, wait a bit
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let deliveries = self
            .queue
            .consume(
                &self.consumer_name,
                self.config.consume_block.as_millis() as u64,
                available,
            )
            .await?;

        if deliveries.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", deliveries.len());

        for delivery in deliveries {
            let permit = self
                .job_semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::queue_failed("Semaphore closed"))?;
            let queue = Arc::clone(&self.queue);
            let runner = Arc::clone(&self.runner);
            let config = self.config.clone();

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_delivery(&config, runner, queue, delivery).await;
            });
        }

        Ok(())
    }

    /// Run one delivered job and settle it.
    async fn execute_delivery(
        config: &WorkerConfig,
        runner: Arc<JobRunner>,
        queue: Arc<JobQueue>,
        delivery: Delivery,
    ) {
        let Delivery {
            message_id,
            job: queue_job,
            times_delivered,
        } = delivery;
        let QueueJob::TranscodeVideo(job) = &queue_job;
        let store: Arc<dyn TaskStore> = queue.clone();

        let max_deliveries = queue.config().max_deliveries;
        if times_delivered > max_deliveries {
            let reason = format!("abandoned after {} deliveries", times_delivered - 1);
            warn!(job_id = %job.job_id, "{}", reason);
            let record = TaskRecord::queued(job.job_id.clone()).fail(reason.clone());
            if let Err(e) = store.put_task(&record).await {
                warn!(job_id = %job.job_id, "Failed to write task record: {}", e);
            }
            if let Err(e) = queue.dlq(&message_id, &queue_job, &reason).await {
                error!(job_id = %job.job_id, "Failed to move job to DLQ: {}", e);
            }
            return;
        }

        let listener = TaskRecordListener::new(Arc::clone(&store), job.job_id.clone());
        let settlement = execute(&runner, job, config.hard_time_limit, &listener).await;

        let record = final_record(listener.current().await, &settlement);
        if let Err(e) = store.put_task(&record).await {
            warn!(job_id = %job.job_id, "Failed to write final task record: {}", e);
        }

        let settled = match &settlement {
            Settlement::HardTimeout => queue.dlq(&message_id, &queue_job, HARD_LIMIT_MESSAGE).await,
            Settlement::Completed(_) => queue.ack(&message_id).await,
        };
        if let Err(e) = settled {
            error!(job_id = %job.job_id, "Failed to settle job message: {}", e);
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            let available = self.job_semaphore.available_permits();
            if available == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
