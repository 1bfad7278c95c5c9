//! Firestore REST API client.
//!
//! - Token caching with refresh margin, or a static token for the emulator
//! - HTTP client tuning (pooling, timeouts)
//! - One transparent re-authentication on expired tokens
//! - Observability (tracing spans, metrics)

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use crate::auth::{AccessToken, TokenCache};
use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_request;
use crate::retry::{with_retry, RetryConfig};
use crate::types::{Document, RunQueryRequest, RunQueryResponse, StructuredQuery, Value};

/// Bearer value accepted by the Firestore emulator.
const EMULATOR_TOKEN: &str = "owner";

/// Firestore client configuration.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    /// GCP project ID
    pub project_id: String,
    /// Database ID (usually "(default)")
    pub database_id: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Retry configuration
    pub retry: RetryConfig,
    /// `host:port` of a Firestore emulator; plain HTTP and no credentials
    pub emulator_host: Option<String>,
}

impl FirestoreConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: "(default)".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
            emulator_host: None,
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> FirestoreResult<Self> {
        let project_id = std::env::var("GCP_PROJECT_ID")
            .or_else(|_| std::env::var("FIREBASE_PROJECT_ID"))
            .map_err(|_| {
                FirestoreError::auth_error(
                    "GCP_PROJECT_ID or FIREBASE_PROJECT_ID must be set to access Firestore",
                )
            })?;

        if project_id.is_empty() {
            return Err(FirestoreError::auth_error(
                "GCP_PROJECT_ID or FIREBASE_PROJECT_ID cannot be empty",
            ));
        }

        let connect_timeout_secs: u64 = std::env::var("FIRESTORE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            database_id: std::env::var("FIRESTORE_DATABASE_ID")
                .unwrap_or_else(|_| "(default)".to_string()),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
            emulator_host: std::env::var("FIRESTORE_EMULATOR_HOST")
                .ok()
                .filter(|h| !h.is_empty()),
            ..Self::new(project_id)
        })
    }

    /// Base URL of the database's document tree.
    pub fn documents_url(&self) -> String {
        let origin = match &self.emulator_host {
            Some(host) => format!("http://{}", host),
            None => "https://firestore.googleapis.com".to_string(),
        };
        format!(
            "{}/v1/projects/{}/databases/{}/documents",
            origin, self.project_id, self.database_id
        )
    }
}

/// Firestore REST API client.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    base_url: String,
    token: AccessToken,
}

impl FirestoreClient {
    /// Create a new client, resolving credentials unless an emulator is configured.
    pub async fn new(config: FirestoreConfig) -> FirestoreResult<Self> {
        let token = if config.emulator_host.is_some() {
            AccessToken::Static(EMULATOR_TOKEN.to_string())
        } else {
            let provider = gcp_auth::provider()
                .await
                .map_err(|e| FirestoreError::auth_error(format!("No GCP credentials: {}", e)))?;
            AccessToken::Provider(Arc::new(TokenCache::new(provider)))
        };

        Self::with_access_token(config, token)
    }

    /// Create a client with an explicit token source.
    pub fn with_access_token(config: FirestoreConfig, token: AccessToken) -> FirestoreResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("vproc-firestore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FirestoreError::Network)?;

        let base_url = config.documents_url();

        Ok(Self {
            http,
            config,
            base_url,
            token,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> FirestoreResult<Self> {
        Self::new(FirestoreConfig::from_env()?).await
    }

    pub fn config(&self) -> &FirestoreConfig {
        &self.config
    }

    /// Full resource name of a document, as used in query cursors.
    pub fn document_name(&self, collection: &str, doc_id: &str) -> String {
        format!(
            "projects/{}/databases/{}/documents/{}/{}",
            self.config.project_id, self.config.database_id, collection, doc_id
        )
    }

    fn document_url(&self, collection: &str, doc_id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            collection,
            urlencoding::encode(doc_id)
        )
    }

    /// Get a document.
    pub async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> FirestoreResult<Option<Document>> {
        let url = self.document_url(collection, doc_id);

        self.execute_request("get_document", collection, async {
            let response = self.send(|token| self.http.get(&url).bearer_auth(token)).await?;
            match response.status() {
                StatusCode::OK => Ok(Some(response.json().await?)),
                StatusCode::NOT_FOUND => Ok(None),
                status => Err(Self::error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Create a document. Firestore assigns an ID when `doc_id` is `None`.
    pub async fn create_document(
        &self,
        collection: &str,
        doc_id: Option<&str>,
        fields: HashMap<String, Value>,
    ) -> FirestoreResult<Document> {
        let url = match doc_id {
            Some(id) => format!(
                "{}/{}?documentId={}",
                self.base_url,
                collection,
                urlencoding::encode(id)
            ),
            None => format!("{}/{}", self.base_url, collection),
        };
        let body = Document::new(fields);

        self.execute_request("create_document", collection, async {
            let response = self
                .send(|token| self.http.post(&url).bearer_auth(token).json(&body))
                .await?;
            match response.status() {
                StatusCode::OK | StatusCode::CREATED => Ok(response.json().await?),
                StatusCode::CONFLICT => Err(FirestoreError::AlreadyExists(format!(
                    "{}/{}",
                    collection,
                    doc_id.unwrap_or_default()
                ))),
                status => Err(Self::error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Create a document under a fresh random ID with the retry policy applied.
    ///
    /// The ID is chosen before the first attempt, so a retried create that
    /// already landed comes back as a conflict and is treated as written.
    pub async fn append_document(
        &self,
        operation: &'static str,
        collection: &str,
        fields: HashMap<String, Value>,
    ) -> FirestoreResult<String> {
        let doc_id = Uuid::new_v4().simple().to_string();
        let mut attempts = 0u32;

        let outcome = self
            .with_retry(operation, || {
                attempts += 1;
                let fields = fields.clone();
                let doc_id = doc_id.as_str();
                async move { self.create_document(collection, Some(doc_id), fields).await }
            })
            .await;

        match outcome {
            Ok(_) => Ok(doc_id),
            Err(FirestoreError::AlreadyExists(_)) if attempts > 1 => {
                debug!(collection, doc_id = %doc_id, "Document written by an earlier attempt");
                Ok(doc_id)
            }
            Err(e) => Err(e),
        }
    }

    /// Write a document, creating it if missing.
    ///
    /// With an `update_mask` only the listed fields are replaced.
    pub async fn update_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
        update_mask: Option<Vec<String>>,
    ) -> FirestoreResult<Document> {
        let mut url = self.document_url(collection, doc_id);
        if let Some(mask) = update_mask {
            let params: Vec<String> = mask
                .iter()
                .map(|f| format!("updateMask.fieldPaths={}", urlencoding::encode(f)))
                .collect();
            url = format!("{}?{}", url, params.join("&"));
        }
        let body = Document::new(fields);

        self.execute_request("update_document", collection, async {
            let response = self
                .send(|token| self.http.patch(&url).bearer_auth(token).json(&body))
                .await?;
            match response.status() {
                StatusCode::OK => Ok(response.json().await?),
                status => Err(Self::error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Run a structured query.
    ///
    /// `parent_path` is the document containing the queried collection, or
    /// an empty string for a root collection.
    pub async fn run_query(
        &self,
        parent_path: &str,
        query: StructuredQuery,
    ) -> FirestoreResult<Vec<Document>> {
        let url = if parent_path.is_empty() {
            format!("{}:runQuery", self.base_url)
        } else {
            format!("{}/{}:runQuery", self.base_url, parent_path)
        };
        let request = RunQueryRequest {
            structured_query: query,
        };
        let label = request
            .structured_query
            .from
            .first()
            .map(|c| c.collection_id.clone())
            .unwrap_or_default();

        self.execute_request("run_query", &label, async {
            let response = self
                .send(|token| self.http.post(&url).bearer_auth(token).json(&request))
                .await?;
            match response.status() {
                StatusCode::OK => {
                    let body = response.text().await?;
                    // runQuery returns a JSON array of RunQueryResponse objects
                    let responses: Vec<RunQueryResponse> =
                        serde_json::from_str(&body).map_err(|e| {
                            FirestoreError::InvalidResponse(format!(
                                "Failed to parse runQuery response: {} (body prefix: {})",
                                e,
                                body.chars().take(200).collect::<String>()
                            ))
                        })?;
                    Ok(responses.into_iter().filter_map(|r| r.document).collect())
                }
                status => Err(Self::error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Execute with the client's retry policy.
    pub async fn with_retry<T, F, Fut>(&self, operation: &'static str, op: F) -> FirestoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FirestoreResult<T>>,
    {
        with_retry(&self.config.retry, operation, op).await
    }

    /// Send a request, re-authenticating once if the token was rejected as expired.
    async fn send<F>(&self, build: F) -> FirestoreResult<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.token.get().await?;
        let response = build(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if !(body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")) {
            return Err(FirestoreError::auth_error(body));
        }

        self.token.invalidate().await;
        let token = self.token.get().await?;
        Ok(build(&token).send().await?)
    }

    /// Execute a request with tracing and metrics.
    async fn execute_request<T, F>(
        &self,
        operation: &'static str,
        collection: &str,
        fut: F,
    ) -> FirestoreResult<T>
    where
        F: Future<Output = FirestoreResult<T>>,
    {
        let span = info_span!("firestore_request", operation, collection = %collection);

        let start = Instant::now();
        let result = fut.instrument(span).await;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, start.elapsed().as_secs_f64());

        result
    }

    async fn error_response(status: StatusCode, url: &str, response: Response) -> FirestoreError {
        let body = response.text().await.unwrap_or_default();
        FirestoreError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
    }
}
