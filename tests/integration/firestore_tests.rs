//! Firestore integration tests.
//!
//! Run against the emulator (`FIRESTORE_EMULATOR_HOST`) or a real project.

use chrono::Utc;

use vproc_firestore::{
    CursorStore, FeedCursor, FeedCursorRepository, FirestoreClient, ProcessingResultRepository,
};
use vproc_models::{JobId, ProcessingResult};

async fn client() -> FirestoreClient {
    dotenvy::dotenv().ok();
    FirestoreClient::from_env()
        .await
        .expect("Failed to create Firestore client")
}

#[tokio::test]
#[ignore = "requires Firestore credentials"]
async fn test_firestore_connection() {
    let client = client().await;

    let doc = client
        .get_document("_health", "_check")
        .await
        .expect("Failed to read document");
    println!("Health document present: {}", doc.is_some());
}

#[tokio::test]
#[ignore = "requires Firestore credentials"]
async fn test_processing_result_append_and_read() {
    let repo = ProcessingResultRepository::new(client().await);

    let result = ProcessingResult::new(JobId::new(), "https://example.com/integration", 2048)
        .with_ffmpeg_config(vec!["ffmpeg".to_string(), "-y".to_string()])
        .fail("EncodingFailed: integration test");

    let doc_id = repo.append(&result).await.expect("Failed to append result");
    println!("Appended result: {}", doc_id);

    let fetched = repo
        .get(&doc_id)
        .await
        .expect("Failed to read result")
        .expect("result exists");
    assert_eq!(fetched.job_id, result.job_id);
    assert_eq!(fetched.processed_size, 0);
    assert_eq!(fetched.ffmpeg_config, result.ffmpeg_config);
}

#[tokio::test]
#[ignore = "requires Firestore credentials"]
async fn test_feed_cursor_roundtrip() {
    let cursors = FeedCursorRepository::new(client().await);
    let listener = format!("integration-{}", JobId::new());

    assert!(cursors.load(&listener).await.expect("Failed to load").is_none());

    let cursor = FeedCursor::starting_at(Utc::now());
    cursors.save(&listener, &cursor).await.expect("Failed to save");

    let loaded = cursors
        .load(&listener)
        .await
        .expect("Failed to load")
        .expect("cursor saved");
    assert_eq!(loaded.created_at.timestamp(), cursor.created_at.timestamp());
}
