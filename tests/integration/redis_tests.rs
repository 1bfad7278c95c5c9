//! Redis/Queue integration tests.

use std::time::Duration;

use vproc_models::{JobDescriptor, JobOrigin, JobState};
use vproc_queue::{
    JobDispatch, JobQueue, QueueConfig, QueueJob, TaskRecord, TaskStatus, TaskStore,
    TranscodeVideoJob,
};

/// Queue on a private stream so runs don't interfere.
fn test_queue(suffix: &str) -> JobQueue {
    dotenvy::dotenv().ok();
    let config = QueueConfig {
        stream_name: format!("vproc:test:{}:jobs", suffix),
        consumer_group: format!("vproc:test:{}:workers", suffix),
        dlq_stream_name: format!("vproc:test:{}:dlq", suffix),
        task_ttl: Duration::from_secs(60),
        ..QueueConfig::from_env()
    };
    JobQueue::new(config).expect("Failed to create queue")
}

fn job(url: &str) -> TranscodeVideoJob {
    let descriptor = JobDescriptor::new(url, None, None).expect("valid descriptor");
    TranscodeVideoJob::new(descriptor, JobOrigin::Http)
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_connection() {
    let queue = test_queue("conn");
    queue.init().await.expect("Failed to initialize queue");
    queue.ping().await.expect("Failed to ping");

    let len = queue.len().await.expect("Failed to get queue length");
    println!("Queue length: {}", len);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_dispatch_consume_ack() {
    let queue = test_queue("cycle");
    queue.init().await.expect("Failed to initialize queue");

    let job = job("https://www.youtube.com/watch?v=test");
    let job_id = job.job_id.clone();

    let record = queue.dispatch(job).await.expect("Failed to dispatch");
    assert_eq!(record.status, TaskStatus::Queued);

    let deliveries = queue
        .consume("test-consumer", 1000, 1)
        .await
        .expect("Failed to consume");
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].job.job_id(), &job_id);
    assert_eq!(deliveries[0].times_delivered, 1);

    queue
        .ack(&deliveries[0].message_id)
        .await
        .expect("Failed to ack");

    let record = queue
        .task(job_id.as_str())
        .await
        .expect("Failed to read task")
        .expect("task record exists");
    assert_eq!(record.task_id, job_id);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_task_record_updates() {
    let queue = test_queue("tasks");

    let job = job("https://example.com/video");
    let record = TaskRecord::queued(job.job_id.clone()).advance(JobState::Transcoding);
    queue.put_task(&record).await.expect("Failed to write task");

    let fetched = queue
        .task(job.job_id.as_str())
        .await
        .expect("Failed to read task")
        .expect("task record exists");
    assert_eq!(fetched.status, TaskStatus::Started);
    assert_eq!(fetched.state, JobState::Transcoding);

    assert!(queue
        .task("no-such-task")
        .await
        .expect("Failed to read task")
        .is_none());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_dlq() {
    let queue = test_queue("dlq");
    queue.init().await.expect("Failed to initialize queue");

    let queue_job = QueueJob::from(job("https://example.com/broken"));
    let message_id = queue.enqueue(&queue_job).await.expect("Failed to enqueue");

    let before = queue.dlq_len().await.expect("Failed to get DLQ length");
    queue
        .dlq(&message_id, &queue_job, "hard time limit exceeded")
        .await
        .expect("Failed to move to DLQ");
    let after = queue.dlq_len().await.expect("Failed to get DLQ length");

    assert_eq!(after, before + 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_claim_pending_from_crashed_consumer() {
    let queue = test_queue("claim");
    queue.init().await.expect("Failed to initialize queue");

    queue.dispatch(job("https://example.com/claim")).await.expect("Failed to dispatch");
    let delivered = queue
        .consume("crashed-consumer", 1000, 1)
        .await
        .expect("Failed to consume");
    assert_eq!(delivered.len(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;

    let claimed = queue
        .claim_pending("rescuer", 10, 10)
        .await
        .expect("Failed to claim");
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].message_id, delivered[0].message_id);
    assert_eq!(claimed[0].times_delivered, 2);

    queue.ack(&claimed[0].message_id).await.expect("Failed to ack");
}
