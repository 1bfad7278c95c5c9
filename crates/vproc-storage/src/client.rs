//! Cloudinary upload API client.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::signing::{sign, SIGNATURE_ALGORITHM};
use crate::store::{asset_key, MediaStore, PublishedAsset};

const DEFAULT_API_BASE_URL: &str = "https://api.cloudinary.com";
const DEFAULT_DELIVERY_BASE_URL: &str = "https://res.cloudinary.com";

/// Streaming profile requested for the adaptive manifest.
pub const HLS_EAGER_TRANSFORMATION: &str = "sp_auto/m3u8";

/// Configuration for the Cloudinary client.
#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    /// Upload API base URL
    pub api_base_url: String,
    /// Delivery host used to derive manifest URLs
    pub delivery_base_url: String,
    /// Whole-request timeout for an upload
    pub upload_timeout: Duration,
}

impl CloudinaryConfig {
    pub fn new(
        cloud_name: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            cloud_name: cloud_name.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            delivery_base_url: DEFAULT_DELIVERY_BASE_URL.to_string(),
            upload_timeout: Duration::from_secs(600),
        }
    }

    /// Create config from environment variables.
    ///
    /// Accepts either `CLOUDINARY_URL` (`cloudinary://<key>:<secret>@<cloud>`)
    /// or the separate `CLOUDINARY_CLOUD_NAME`, `CLOUDINARY_API_KEY` and
    /// `CLOUDINARY_API_SECRET` variables.
    pub fn from_env() -> StorageResult<Self> {
        let mut config = match std::env::var("CLOUDINARY_URL") {
            Ok(url) => Self::from_url(&url)?,
            Err(_) => Self::new(
                std::env::var("CLOUDINARY_CLOUD_NAME")
                    .map_err(|_| StorageError::config_error("CLOUDINARY_CLOUD_NAME not set"))?,
                std::env::var("CLOUDINARY_API_KEY")
                    .map_err(|_| StorageError::config_error("CLOUDINARY_API_KEY not set"))?,
                std::env::var("CLOUDINARY_API_SECRET")
                    .map_err(|_| StorageError::config_error("CLOUDINARY_API_SECRET not set"))?,
            ),
        };

        if let Ok(base) = std::env::var("CLOUDINARY_API_BASE_URL") {
            config.api_base_url = base;
        }
        if let Some(secs) = std::env::var("CLOUDINARY_UPLOAD_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.upload_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Parse a `cloudinary://<key>:<secret>@<cloud>` URL.
    pub fn from_url(raw: &str) -> StorageResult<Self> {
        let url = url::Url::parse(raw)
            .map_err(|e| StorageError::config_error(format!("invalid CLOUDINARY_URL: {}", e)))?;

        if url.scheme() != "cloudinary" {
            return Err(StorageError::config_error(
                "CLOUDINARY_URL must use the cloudinary:// scheme",
            ));
        }

        let cloud = url.host_str().unwrap_or_default();
        let key = url.username();
        let secret = url.password().unwrap_or_default();
        if cloud.is_empty() || key.is_empty() || secret.is_empty() {
            return Err(StorageError::config_error(
                "CLOUDINARY_URL must include api key, secret and cloud name",
            ));
        }

        Ok(Self::new(cloud, key, secret))
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/v1_1/{}/video/upload",
            self.api_base_url.trim_end_matches('/'),
            self.cloud_name
        )
    }

    /// Manifest URL the store serves for `public_id` with the auto streaming profile.
    pub fn derived_hls_url(&self, public_id: &str) -> String {
        format!(
            "{}/{}/video/upload/sp_auto/{}.m3u8",
            self.delivery_base_url.trim_end_matches('/'),
            self.cloud_name,
            public_id
        )
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    #[serde(default)]
    secure_url: Option<String>,
    #[serde(default)]
    bytes: Option<u64>,
    #[serde(default)]
    playback_url: Option<String>,
    #[serde(default)]
    eager: Vec<EagerResult>,
}

#[derive(Debug, Deserialize)]
struct EagerResult {
    #[serde(default)]
    secure_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Cloudinary-backed [`MediaStore`].
#[derive(Clone)]
pub struct CloudinaryStore {
    http: Client,
    config: CloudinaryConfig,
}

impl CloudinaryStore {
    /// Create a new client from configuration.
    pub fn new(config: CloudinaryConfig) -> StorageResult<Self> {
        let http = Client::builder()
            .timeout(config.upload_timeout)
            .build()
            .map_err(|e| StorageError::config_error(e.to_string()))?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Self::new(CloudinaryConfig::from_env()?)
    }

    pub fn config(&self) -> &CloudinaryConfig {
        &self.config
    }

    /// Upload a file under `public_id`.
    pub async fn upload_video(&self, path: &Path, public_id: &str) -> StorageResult<PublishedAsset> {
        let file = tokio::fs::File::open(path).await?;
        let total = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "rendition.mp4".to_string());

        let params: Vec<(&'static str, String)> = vec![
            ("eager", HLS_EAGER_TRANSFORMATION.to_string()),
            ("eager_async", "true".to_string()),
            ("overwrite", "false".to_string()),
            ("public_id", public_id.to_string()),
            ("timestamp", Utc::now().timestamp().to_string()),
        ];
        let signature = sign(&params, &self.config.api_secret);

        // Log upload progress in quarter steps.
        let log_id = public_id.to_string();
        let mut sent: u64 = 0;
        let mut next_mark: u64 = 25;
        let stream = ReaderStream::new(file).inspect(move |chunk| {
            if let Ok(chunk) = chunk {
                sent += chunk.len() as u64;
                if total > 0 {
                    let pct = sent * 100 / total;
                    while pct >= next_mark && next_mark <= 100 {
                        debug!(public_id = %log_id, sent, total, "Upload {}% complete", next_mark);
                        next_mark += 25;
                    }
                }
            }
        });

        let body = Body::wrap_stream(stream);
        let part = Part::stream_with_length(body, total)
            .file_name(file_name)
            .mime_str("video/mp4")?;

        let mut form = Form::new().part("file", part);
        for (key, value) in params {
            form = form.text(key, value);
        }
        form = form
            .text("api_key", self.config.api_key.clone())
            .text("signature", signature)
            .text("signature_algorithm", SIGNATURE_ALGORITHM);

        debug!(public_id = %public_id, bytes = total, "Uploading rendition");
        let started = Instant::now();

        let response = self
            .http
            .post(self.config.upload_url())
            .multipart(form)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            metrics::counter!("vproc_publish_total", "status" => "rejected").increment(1);
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            warn!(status = status.as_u16(), "Media store rejected upload: {}", message);
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: UploadResponse = serde_json::from_str(&text)?;
        let secure_url = parsed
            .secure_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| StorageError::invalid_response("upload response has no secure_url"))?;

        let hls_url = parsed
            .eager
            .into_iter()
            .filter_map(|e| e.secure_url)
            .find(|u| u.ends_with(".m3u8"))
            .or(parsed.playback_url)
            .unwrap_or_else(|| self.config.derived_hls_url(&parsed.public_id));

        metrics::counter!("vproc_publish_total", "status" => "ok").increment(1);
        metrics::histogram!("vproc_publish_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        info!(
            public_id = %parsed.public_id,
            secure_url = %secure_url,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Rendition published"
        );

        Ok(PublishedAsset {
            public_id: parsed.public_id,
            secure_url,
            hls_url,
            bytes: parsed.bytes,
        })
    }
}

#[async_trait]
impl MediaStore for CloudinaryStore {
    async fn publish(&self, path: &Path, target_identifier: &str) -> StorageResult<PublishedAsset> {
        let key = asset_key(target_identifier);
        self.upload_video(path, &key).await
    }
}
