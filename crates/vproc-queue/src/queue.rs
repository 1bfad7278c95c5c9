//! Job queue using Redis Streams.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::job::{QueueJob, TranscodeVideoJob};
use crate::task::TaskRecord;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Deliveries after which a reclaimed message goes to the DLQ
    pub max_deliveries: u32,
    /// How long task records are kept
    pub task_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "vproc:jobs".to_string(),
            consumer_group: "vproc:workers".to_string(),
            dlq_stream_name: "vproc:dlq".to_string(),
            max_deliveries: 3,
            task_ttl: Duration::from_secs(86400),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_deliveries: std::env::var("QUEUE_MAX_DELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_deliveries),
            task_ttl: std::env::var("QUEUE_TASK_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.task_ttl),
        }
    }
}

/// Submission side of the queue, as seen by the API.
#[async_trait]
pub trait JobDispatch: Send + Sync {
    /// Enqueue a job and record it as queued.
    async fn dispatch(&self, job: TranscodeVideoJob) -> QueueResult<TaskRecord>;

    /// Look up a task record by task ID.
    async fn task(&self, task_id: &str) -> QueueResult<Option<TaskRecord>>;

    /// Number of messages in the job stream.
    async fn depth(&self) -> QueueResult<u64>;
}

/// Task record writes, as seen by the worker.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn put_task(&self, record: &TaskRecord) -> QueueResult<()>;
}

/// A message read from the stream.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: String,
    pub job: QueueJob,
    /// How many times the group has delivered this message, including this one
    pub times_delivered: u32,
}

/// Job queue client.
#[derive(Clone)]
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn task_key(task_id: &str) -> String {
        format!("vproc:task:{}", task_id)
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // Create consumer group (ignore error if already exists)
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Check that Redis answers.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Enqueue a job.
    pub async fn enqueue(&self, job: &QueueJob) -> QueueResult<String> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        metrics::counter!("vproc_jobs_enqueued_total", "origin" => job.origin().as_str())
            .increment(1);
        info!(
            job_id = %job.job_id(),
            message_id = %message_id,
            origin = job.origin().as_str(),
            "Enqueued job"
        );

        Ok(message_id)
    }

    /// Acknowledge a job (mark as settled).
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        // Delete the message from the stream
        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    /// Move a job to the dead letter queue.
    pub async fn dlq(&self, message_id: &str, job: &QueueJob, error: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(message_id).await?;

        warn!(job_id = %job.job_id(), "Moved job to DLQ: {}", error);
        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Read new jobs for this consumer, blocking up to `block_ms`.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;

        let result: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::dequeue_failed(e.to_string()))?;

        let mut jobs = Vec::new();
        for stream_key in result.map(|r| r.keys).unwrap_or_default() {
            for entry in stream_key.ids {
                if let Some(job) = self.decode_entry(&entry.id, &entry.map).await {
                    debug!(job_id = %job.job_id(), "Consumed job from stream");
                    jobs.push(Delivery {
                        message_id: entry.id,
                        job,
                        times_delivered: 1,
                    });
                }
            }
        }

        Ok(jobs)
    }

    /// Claim pending jobs that have been idle for too long.
    /// This handles jobs from crashed workers.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;

        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let idle: Vec<_> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms as u64 >= min_idle_ms)
            .collect();
        if idle.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms);
        for p in &idle {
            cmd.arg(&p.id);
        }
        let result: redis::streams::StreamClaimReply = cmd.query_async(&mut conn).await?;

        let mut jobs = Vec::new();
        for entry in result.ids {
            let times_delivered = idle
                .iter()
                .find(|p| p.id == entry.id)
                .map(|p| p.times_delivered as u32 + 1)
                .unwrap_or(1);
            if let Some(job) = self.decode_entry(&entry.id, &entry.map).await {
                info!(
                    job_id = %job.job_id(),
                    times_delivered,
                    "Claimed pending job from stream"
                );
                jobs.push(Delivery {
                    message_id: entry.id,
                    job,
                    times_delivered,
                });
            }
        }

        Ok(jobs)
    }

    /// Parse a stream entry, acking malformed ones so they are not redelivered.
    async fn decode_entry(
        &self,
        message_id: &str,
        map: &std::collections::HashMap<String, redis::Value>,
    ) -> Option<QueueJob> {
        let parsed = match map.get("job") {
            Some(redis::Value::BulkString(payload)) => {
                serde_json::from_slice::<QueueJob>(payload).map_err(|e| e.to_string())
            }
            _ => Err("missing job field".to_string()),
        };

        match parsed {
            Ok(job) => Some(job),
            Err(e) => {
                warn!(message_id, "Failed to parse job payload: {}", e);
                self.ack(message_id).await.ok();
                None
            }
        }
    }

    /// Write a task record with the configured TTL.
    pub async fn put_task_record(&self, record: &TaskRecord) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(record)?;
        conn.set_ex::<_, _, ()>(
            Self::task_key(record.task_id.as_str()),
            payload,
            self.config.task_ttl.as_secs(),
        )
        .await?;
        Ok(())
    }

    /// Read a task record.
    pub async fn get_task_record(&self, task_id: &str) -> QueueResult<Option<TaskRecord>> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn.get(Self::task_key(task_id)).await?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(QueueError::from))
            .transpose()
    }
}

#[async_trait]
impl JobDispatch for JobQueue {
    async fn dispatch(&self, job: TranscodeVideoJob) -> QueueResult<TaskRecord> {
        let record = TaskRecord::queued(job.job_id.clone());
        // Record first so a fast worker's update is not overwritten.
        self.put_task_record(&record).await?;
        self.enqueue(&QueueJob::from(job)).await?;
        Ok(record)
    }

    async fn task(&self, task_id: &str) -> QueueResult<Option<TaskRecord>> {
        self.get_task_record(task_id).await
    }

    async fn depth(&self) -> QueueResult<u64> {
        self.len().await
    }
}

#[async_trait]
impl TaskStore for JobQueue {
    async fn put_task(&self, record: &TaskRecord) -> QueueResult<()> {
        self.put_task_record(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_from_env() {
        std::env::set_var("QUEUE_STREAM", "test:jobs");
        std::env::set_var("QUEUE_TASK_TTL_SECS", "60");
        std::env::set_var("QUEUE_MAX_DELIVERIES", "not-a-number");

        let config = QueueConfig::from_env();
        assert_eq!(config.stream_name, "test:jobs");
        assert_eq!(config.task_ttl, Duration::from_secs(60));
        assert_eq!(config.max_deliveries, 3);
        assert_eq!(config.consumer_group, "vproc:workers");

        std::env::remove_var("QUEUE_STREAM");
        std::env::remove_var("QUEUE_TASK_TTL_SECS");
        std::env::remove_var("QUEUE_MAX_DELIVERIES");
    }

    #[test]
    fn test_task_key() {
        assert_eq!(JobQueue::task_key("abc"), "vproc:task:abc");
    }

    #[test]
    fn test_new_rejects_bad_url() {
        let config = QueueConfig {
            redis_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(JobQueue::new(config).is_err());
    }
}
