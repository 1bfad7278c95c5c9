//! Repository for catalog entries.
//!
//! Collection: `videos/{random id}`.

use std::collections::HashMap;

use tracing::info;

use vproc_models::CatalogEntry;

use crate::client::FirestoreClient;
use crate::error::FirestoreResult;
use crate::types::{ToFirestoreValue, Value};

pub const CATALOG_COLLECTION: &str = "videos";

/// Writer for browsable [`CatalogEntry`] records.
#[derive(Clone)]
pub struct CatalogRepository {
    client: FirestoreClient,
}

impl CatalogRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    /// Insert an entry, returning the new document ID.
    pub async fn insert(&self, entry: &CatalogEntry) -> FirestoreResult<String> {
        let doc_id = self
            .client
            .append_document(
                "insert_catalog_entry",
                CATALOG_COLLECTION,
                entry_to_fields(entry),
            )
            .await?;

        info!(
            doc_id = %doc_id,
            title = %entry.title,
            publisher_id = %entry.publisher.id,
            "Added catalog entry"
        );
        Ok(doc_id)
    }
}

pub(crate) fn entry_to_fields(entry: &CatalogEntry) -> HashMap<String, Value> {
    let mut publisher = HashMap::new();
    publisher.insert("id".to_string(), entry.publisher.id.clone());
    publisher.insert("name".to_string(), entry.publisher.name.clone());
    publisher.insert("avatar".to_string(), entry.publisher.avatar.clone());

    let mut fields = HashMap::new();
    fields.insert("title".to_string(), entry.title.to_firestore_value());
    fields.insert("video_url".to_string(), entry.video_url.to_firestore_value());
    fields.insert("hls_url".to_string(), entry.hls_url.to_firestore_value());
    fields.insert("thumbnail".to_string(), entry.thumbnail.to_firestore_value());
    fields.insert("language".to_string(), entry.language.to_firestore_value());
    fields.insert("source_link".to_string(), entry.source_link.to_firestore_value());
    fields.insert("keywords".to_string(), entry.keywords.to_firestore_value());
    fields.insert("topic".to_string(), entry.topic.to_firestore_value());
    fields.insert("publisher".to_string(), publisher.to_firestore_value());
    fields.insert("country".to_string(), entry.country.to_firestore_value());
    fields.insert("duration".to_string(), entry.duration.to_firestore_value());
    fields.insert("type".to_string(), entry.entry_type.to_firestore_value());
    fields.insert("created_at".to_string(), entry.created_at.to_firestore_value());
    fields
}
