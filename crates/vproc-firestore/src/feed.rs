//! Submission change feed.
//!
//! New submissions are documents inserted into `youtube_videos` carrying a
//! timestamp `created_at`. The feed is read in `(created_at, __name__)` order
//! starting just after a cursor that is persisted at
//! `_feed_cursors/{listener}` so a restarted listener resumes where it
//! stopped. The query filters on a timestamp-typed `created_at`, so documents
//! whose `created_at` is missing or of another type never match.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use vproc_models::{DescriptorError, JobDescriptor, ProvenanceMetadata};

use crate::client::FirestoreClient;
use crate::error::FirestoreResult;
use crate::types::{
    CollectionSelector, Cursor, Document, FieldFilter, FieldReference, Filter, FromFirestoreValue,
    Order, StructuredQuery, ToFirestoreValue, Value,
};

pub const FEED_COLLECTION: &str = "youtube_videos";
pub const CURSOR_COLLECTION: &str = "_feed_cursors";
pub const CREATED_AT_FIELD: &str = "created_at";

/// A feed document that lacks a required field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("missing or invalid field `{0}`")]
pub struct MalformedSubmission(pub &'static str);

/// Position in the feed. Reads resume strictly after it.
///
/// Ordered the way the feed is read; a cursor without a document name sits
/// before every document sharing its timestamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FeedCursor {
    pub created_at: DateTime<Utc>,
    /// Full resource name of the last document read, absent for a fresh cursor
    pub document_name: Option<String>,
}

impl FeedCursor {
    /// Cursor that skips everything inserted before `at`.
    pub fn starting_at(at: DateTime<Utc>) -> Self {
        Self {
            created_at: at,
            document_name: None,
        }
    }
}

/// Submission fields read from a feed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub video_url: String,
    pub public_id: Option<String>,
    pub preferred_resolution: Option<String>,
    pub provenance: ProvenanceMetadata,
}

impl SubmissionRecord {
    pub fn from_fields(fields: &HashMap<String, Value>) -> Result<Self, MalformedSubmission> {
        let required = |key: &'static str| {
            fields
                .get(key)
                .and_then(String::from_firestore_value)
                .filter(|s| !s.trim().is_empty())
                .ok_or(MalformedSubmission(key))
        };
        let optional = |key: &str| {
            fields
                .get(key)
                .and_then(String::from_firestore_value)
                .filter(|s| !s.trim().is_empty())
        };

        Ok(Self {
            video_url: required("video_url")?,
            public_id: optional("public_id"),
            preferred_resolution: optional("preferred_resolution"),
            provenance: ProvenanceMetadata {
                publisher_id: required("publisher_id")?,
                publisher_avatar: required("publisher_avatar")?,
                publisher_name: required("publisher_name")?,
                publisher_topic: required("publisher_topic")?,
                language: required("video_language")?,
                country: required("video_country")?,
            },
        })
    }

    /// Job descriptor carrying this record's provenance.
    pub fn into_descriptor(self) -> Result<JobDescriptor, DescriptorError> {
        Ok(JobDescriptor::new(
            self.video_url,
            self.public_id.as_deref(),
            self.preferred_resolution.as_deref(),
        )?
        .with_provenance(self.provenance))
    }
}

/// One document read from the feed.
#[derive(Debug, Clone)]
pub struct FeedDocument {
    /// Position of this document; the cursor advances to it whether or not
    /// the record parsed.
    pub position: FeedCursor,
    pub record: Result<SubmissionRecord, MalformedSubmission>,
}

impl FeedDocument {
    fn from_document(doc: &Document) -> Option<Self> {
        let name = doc.name.clone()?;
        let created_at = doc.get::<DateTime<Utc>>(CREATED_AT_FIELD)?;

        let record = match doc.fields.as_ref() {
            Some(fields) => SubmissionRecord::from_fields(fields),
            None => Err(MalformedSubmission("video_url")),
        };

        Some(Self {
            position: FeedCursor {
                created_at,
                document_name: Some(name),
            },
            record,
        })
    }

    pub fn document_id(&self) -> &str {
        self.position
            .document_name
            .as_deref()
            .and_then(|n| n.rsplit('/').next())
            .unwrap_or_default()
    }
}

/// Source of new submissions.
#[async_trait]
pub trait SubmissionSource: Send + Sync {
    /// Up to `limit` documents strictly after `after`, in feed order.
    async fn poll(&self, after: &FeedCursor, limit: u32) -> FirestoreResult<Vec<FeedDocument>>;
}

/// Persistence for listener cursors.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, listener: &str) -> FirestoreResult<Option<FeedCursor>>;
    async fn save(&self, listener: &str, cursor: &FeedCursor) -> FirestoreResult<()>;
}

/// [`SubmissionSource`] over the `youtube_videos` collection.
#[derive(Clone)]
pub struct SubmissionFeed {
    client: FirestoreClient,
}

impl SubmissionFeed {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    fn query(after: &FeedCursor, limit: u32) -> StructuredQuery {
        let mut values = vec![after.created_at.to_firestore_value()];
        if let Some(name) = &after.document_name {
            values.push(Value::ReferenceValue(name.clone()));
        }

        StructuredQuery {
            from: vec![CollectionSelector {
                collection_id: FEED_COLLECTION.to_string(),
                all_descendants: None,
            }],
            r#where: Some(Filter {
                composite_filter: None,
                field_filter: Some(FieldFilter {
                    field: FieldReference::new(CREATED_AT_FIELD),
                    op: "GREATER_THAN_OR_EQUAL".to_string(),
                    value: after.created_at.to_firestore_value(),
                }),
            }),
            order_by: Some(vec![
                Order::ascending(CREATED_AT_FIELD),
                Order::ascending("__name__"),
            ]),
            start_at: Some(Cursor {
                values,
                before: Some(false),
            }),
            limit: Some(limit.min(i32::MAX as u32) as i32),
            ..Default::default()
        }
    }
}

#[async_trait]
impl SubmissionSource for SubmissionFeed {
    async fn poll(&self, after: &FeedCursor, limit: u32) -> FirestoreResult<Vec<FeedDocument>> {
        let docs = self.client.run_query("", Self::query(after, limit)).await?;
        let items: Vec<FeedDocument> = docs.iter().filter_map(FeedDocument::from_document).collect();
        if items.len() != docs.len() {
            debug!(
                dropped = docs.len() - items.len(),
                "Skipped feed documents without a timestamp created_at"
            );
        }
        Ok(items)
    }
}

/// [`CursorStore`] backed by `_feed_cursors/{listener}`.
#[derive(Clone)]
pub struct FeedCursorRepository {
    client: FirestoreClient,
}

impl FeedCursorRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CursorStore for FeedCursorRepository {
    async fn load(&self, listener: &str) -> FirestoreResult<Option<FeedCursor>> {
        let doc = self.client.get_document(CURSOR_COLLECTION, listener).await?;
        Ok(doc.and_then(|d| {
            let created_at = d.get::<DateTime<Utc>>(CREATED_AT_FIELD)?;
            Some(FeedCursor {
                created_at,
                document_name: d.get::<String>("document_name"),
            })
        }))
    }

    async fn save(&self, listener: &str, cursor: &FeedCursor) -> FirestoreResult<()> {
        let mut fields = HashMap::new();
        fields.insert(CREATED_AT_FIELD.to_string(), cursor.created_at.to_firestore_value());
        fields.insert(
            "document_name".to_string(),
            cursor.document_name.clone().to_firestore_value(),
        );
        fields.insert("updated_at".to_string(), Utc::now().to_firestore_value());

        self.client
            .with_retry("save_feed_cursor", || {
                let fields = fields.clone();
                async move {
                    self.client
                        .update_document(CURSOR_COLLECTION, listener, fields, None)
                        .await
                }
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AccessToken;
    use crate::client::FirestoreConfig;
    use chrono::TimeZone;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn feed_fields() -> HashMap<String, Value> {
        [
            ("video_url", "https://youtu.be/abc"),
            ("video_language", "en"),
            ("video_country", "US"),
            ("publisher_id", "pub-1"),
            ("publisher_avatar", "https://img/p.png"),
            ("publisher_name", "Publisher"),
            ("publisher_topic", "topic-1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_firestore_value()))
        .collect()
    }

    fn client_for(server: &MockServer) -> FirestoreClient {
        let mut config = FirestoreConfig::new("p");
        config.emulator_host = Some(server.address().to_string());
        FirestoreClient::with_access_token(config, AccessToken::Static("owner".into())).unwrap()
    }

    #[test]
    fn test_record_parses_provenance() {
        let record = SubmissionRecord::from_fields(&feed_fields()).unwrap();
        assert_eq!(record.provenance.language, "en");
        assert_eq!(record.provenance.publisher_topic, "topic-1");
        assert!(record.public_id.is_none());

        let descriptor = record.into_descriptor().unwrap();
        assert!(descriptor.has_provenance());
        assert_eq!(descriptor.target_identifier, "videos");
    }

    #[test]
    fn test_record_missing_required_field() {
        let mut fields = feed_fields();
        fields.remove("video_country");
        assert_eq!(
            SubmissionRecord::from_fields(&fields),
            Err(MalformedSubmission("video_country"))
        );

        let mut fields = feed_fields();
        fields.insert("video_url".into(), "  ".to_firestore_value());
        assert_eq!(
            SubmissionRecord::from_fields(&fields),
            Err(MalformedSubmission("video_url"))
        );
    }

    #[test]
    fn test_query_starts_after_cursor() {
        let cursor = FeedCursor {
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            document_name: Some("projects/p/databases/(default)/documents/youtube_videos/a".into()),
        };
        let json = serde_json::to_value(SubmissionFeed::query(&cursor, 25)).unwrap();

        assert_eq!(json["orderBy"][0]["field"]["fieldPath"], "created_at");
        assert_eq!(json["orderBy"][1]["field"]["fieldPath"], "__name__");
        assert_eq!(json["startAt"]["before"], false);
        assert_eq!(json["startAt"]["values"].as_array().unwrap().len(), 2);
        assert_eq!(json["limit"], 25);

        let filter = &json["where"]["fieldFilter"];
        assert_eq!(filter["field"]["fieldPath"], "created_at");
        assert_eq!(filter["op"], "GREATER_THAN_OR_EQUAL");
        assert_eq!(filter["value"]["timestampValue"], "2024-05-01T10:00:00.000000Z");
    }

    #[test]
    fn test_non_timestamp_created_at_has_no_position() {
        let mut fields = feed_fields();
        fields.insert(
            "created_at".into(),
            Value::StringValue("2026-10-16T10:00:00Z".into()),
        );
        let mut doc = Document::new(fields);
        doc.name = Some("projects/p/databases/(default)/documents/youtube_videos/d1".into());
        doc.create_time = Some("2026-10-16T10:00:00Z".into());
        assert!(FeedDocument::from_document(&doc).is_none());

        doc.fields
            .as_mut()
            .unwrap()
            .remove("created_at");
        assert!(FeedDocument::from_document(&doc).is_none());
    }

    #[test]
    fn test_cursor_orders_like_feed() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let fresh = FeedCursor::starting_at(at);
        let a = FeedCursor {
            created_at: at,
            document_name: Some("projects/p/databases/(default)/documents/youtube_videos/a".into()),
        };
        let b = FeedCursor {
            document_name: Some("projects/p/databases/(default)/documents/youtube_videos/b".into()),
            ..a.clone()
        };
        let later = FeedCursor::starting_at(at + chrono::Duration::seconds(1));

        assert!(fresh < a);
        assert!(a < b);
        assert!(b < later);
    }

    #[tokio::test]
    async fn test_poll_keeps_malformed_documents_for_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/p/databases/(default)/documents:runQuery"))
            .and(body_partial_json(serde_json::json!({
                "structuredQuery": { "from": [{ "collectionId": "youtube_videos" }] }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "document": {
                        "name": "projects/p/databases/(default)/documents/youtube_videos/good",
                        "fields": {
                            "video_url": { "stringValue": "https://youtu.be/abc" },
                            "video_language": { "stringValue": "en" },
                            "video_country": { "stringValue": "US" },
                            "publisher_id": { "stringValue": "pub-1" },
                            "publisher_avatar": { "stringValue": "https://img/p.png" },
                            "publisher_name": { "stringValue": "Publisher" },
                            "publisher_topic": { "stringValue": "topic-1" },
                            "created_at": { "timestampValue": "2024-05-01T10:00:01Z" }
                        }
                    }
                },
                {
                    "document": {
                        "name": "projects/p/databases/(default)/documents/youtube_videos/bad",
                        "fields": {
                            "created_at": { "timestampValue": "2024-05-01T10:00:02Z" }
                        }
                    }
                }
            ])))
            .mount(&server)
            .await;

        let feed = SubmissionFeed::new(client_for(&server));
        let start = FeedCursor::starting_at(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        let items = feed.poll(&start, 10).await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].document_id(), "good");
        assert!(items[0].record.is_ok());
        assert_eq!(items[1].document_id(), "bad");
        assert!(items[1].record.is_err());
    }

    #[tokio::test]
    async fn test_poll_drops_documents_without_timestamp() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/p/databases/(default)/documents:runQuery"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "document": {
                        "name": "projects/p/databases/(default)/documents/youtube_videos/d1",
                        "fields": {
                            "video_url": { "stringValue": "https://youtu.be/abc" },
                            "created_at": { "stringValue": "2026-10-16T10:00:00Z" }
                        },
                        "createTime": "2026-10-16T10:00:00Z"
                    }
                }
            ])))
            .mount(&server)
            .await;

        let feed = SubmissionFeed::new(client_for(&server));
        let start = FeedCursor::starting_at(Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap());
        let items = feed.poll(&start, 10).await.unwrap();

        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_cursor_load_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let repo = FeedCursorRepository::new(client_for(&server));
        assert!(repo.load("default").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cursor_save() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v1/projects/p/databases/(default)/documents/_feed_cursors/default"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let repo = FeedCursorRepository::new(client_for(&server));
        repo.save("default", &FeedCursor::starting_at(Utc::now()))
            .await
            .unwrap();
    }
}
