//! Repository for processing results.
//!
//! Collection: `videos_processing_results/{random id}`. Records are
//! append-only; nothing in the pipeline updates or deletes them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::info;

use vproc_models::{JobId, ProcessingResult};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::types::{Document, FromFirestoreValue, ToFirestoreValue, Value};

pub const RESULTS_COLLECTION: &str = "videos_processing_results";

/// Append-only store of [`ProcessingResult`]s.
#[derive(Clone)]
pub struct ProcessingResultRepository {
    client: FirestoreClient,
}

impl ProcessingResultRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    /// Append a result, returning the new document ID.
    pub async fn append(&self, result: &ProcessingResult) -> FirestoreResult<String> {
        let doc_id = self
            .client
            .append_document(
                "append_processing_result",
                RESULTS_COLLECTION,
                result_to_fields(result),
            )
            .await?;

        info!(
            job_id = %result.job_id,
            doc_id = %doc_id,
            success = result.is_success(),
            "Recorded processing result"
        );
        Ok(doc_id)
    }

    /// Fetch a result by document ID.
    pub async fn get(&self, doc_id: &str) -> FirestoreResult<Option<ProcessingResult>> {
        let doc = self.client.get_document(RESULTS_COLLECTION, doc_id).await?;
        doc.map(|d| document_to_result(&d)).transpose()
    }
}

pub(crate) fn result_to_fields(result: &ProcessingResult) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("job_id".to_string(), result.job_id.as_str().to_firestore_value());
    fields.insert("video_url".to_string(), result.video_url.to_firestore_value());
    fields.insert(
        "published_url".to_string(),
        result.published_url.to_firestore_value(),
    );
    fields.insert(
        "original_size".to_string(),
        result.original_size.to_firestore_value(),
    );
    fields.insert(
        "processed_size".to_string(),
        result.processed_size.to_firestore_value(),
    );
    fields.insert(
        "ffmpeg_config".to_string(),
        result.ffmpeg_config.to_firestore_value(),
    );
    fields.insert(
        "processing_error".to_string(),
        result.processing_error.to_firestore_value(),
    );
    fields.insert("created_at".to_string(), result.created_at.to_firestore_value());
    fields
}

fn document_to_result(doc: &Document) -> FirestoreResult<ProcessingResult> {
    let fields = doc
        .fields
        .as_ref()
        .ok_or_else(|| FirestoreError::InvalidResponse("processing result has no fields".into()))?;
    let get = |key: &str| fields.get(key);

    let job_id = get("job_id")
        .and_then(String::from_firestore_value)
        .ok_or_else(|| FirestoreError::InvalidResponse("missing job_id".into()))?;

    Ok(ProcessingResult {
        job_id: JobId::from_string(job_id),
        video_url: get("video_url")
            .and_then(String::from_firestore_value)
            .unwrap_or_default(),
        published_url: get("published_url")
            .and_then(String::from_firestore_value)
            .unwrap_or_default(),
        original_size: get("original_size")
            .and_then(u64::from_firestore_value)
            .unwrap_or(0),
        processed_size: get("processed_size")
            .and_then(u64::from_firestore_value)
            .unwrap_or(0),
        ffmpeg_config: get("ffmpeg_config")
            .and_then(Vec::<String>::from_firestore_value)
            .unwrap_or_default(),
        processing_error: get("processing_error")
            .and_then(String::from_firestore_value)
            .unwrap_or_default(),
        created_at: get("created_at")
            .and_then(DateTime::<Utc>::from_firestore_value)
            .unwrap_or_else(Utc::now),
    })
}
