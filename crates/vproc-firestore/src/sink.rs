//! Persistence stage sink.

use async_trait::async_trait;
use tracing::info;

use vproc_models::{CatalogEntry, ProcessingResult};

use crate::catalog_repo::CatalogRepository;
use crate::client::FirestoreClient;
use crate::error::FirestoreResult;
use crate::results_repo::ProcessingResultRepository;

/// Where a job's outcome is recorded.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Record exactly one processing result, plus a catalog entry when given.
    async fn record(
        &self,
        result: &ProcessingResult,
        catalog: Option<&CatalogEntry>,
    ) -> FirestoreResult<()>;
}

/// [`ResultSink`] writing to Firestore.
#[derive(Clone)]
pub struct FirestoreResultSink {
    results: ProcessingResultRepository,
    catalog: CatalogRepository,
}

impl FirestoreResultSink {
    pub fn new(client: FirestoreClient) -> Self {
        Self {
            results: ProcessingResultRepository::new(client.clone()),
            catalog: CatalogRepository::new(client),
        }
    }
}

#[async_trait]
impl ResultSink for FirestoreResultSink {
    async fn record(
        &self,
        result: &ProcessingResult,
        catalog: Option<&CatalogEntry>,
    ) -> FirestoreResult<()> {
        self.results.append(result).await?;

        if let Some(entry) = catalog {
            let doc_id = self.catalog.insert(entry).await?;
            info!(job_id = %result.job_id, catalog_id = %doc_id, "Catalog updated");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AccessToken;
    use crate::client::FirestoreConfig;
    use vproc_models::{JobId, ProvenanceMetadata, SelectedStream, SourceInfo};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DOCS: &str = "/v1/projects/p/databases/(default)/documents";

    fn sink_for(server: &MockServer) -> FirestoreResultSink {
        let mut config = FirestoreConfig::new("p");
        config.emulator_host = Some(server.address().to_string());
        let client =
            FirestoreClient::with_access_token(config, AccessToken::Static("owner".into())).unwrap();
        FirestoreResultSink::new(client)
    }

    async fn mount_collection(server: &MockServer, collection: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path(format!("{}/{}", DOCS, collection)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(times)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_failure_writes_result_only() {
        let server = MockServer::start().await;
        mount_collection(&server, "videos_processing_results", 1).await;
        mount_collection(&server, "videos", 0).await;

        let result = ProcessingResult::new(JobId::new(), "https://youtu.be/x", 10).fail("boom");
        sink_for(&server).record(&result, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_success_with_catalog_writes_both() {
        let server = MockServer::start().await;
        mount_collection(&server, "videos_processing_results", 1).await;
        mount_collection(&server, "videos", 1).await;

        let source = SourceInfo {
            id: "x".into(),
            title: "T".into(),
            thumbnail: String::new(),
            keywords: Vec::new(),
            duration_secs: 1,
            stream: SelectedStream {
                format_id: "18".into(),
                height: 360,
                ext: "mp4".into(),
                filesize: None,
            },
        };
        let provenance = ProvenanceMetadata {
            publisher_id: "p".into(),
            publisher_avatar: "a".into(),
            publisher_name: "n".into(),
            publisher_topic: "t".into(),
            language: "en".into(),
            country: "US".into(),
        };
        let entry = CatalogEntry::from_parts(&source, &provenance, "src", "mp4", "m3u8");
        let result = ProcessingResult::new(JobId::new(), "src", 10).succeed(5, "mp4");

        sink_for(&server).record(&result, Some(&entry)).await.unwrap();
    }
}
