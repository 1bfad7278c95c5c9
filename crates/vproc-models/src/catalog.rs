//! Catalog entries for published videos with provenance.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{ProvenanceMetadata, SourceInfo};

/// Discriminator stored on every catalog entry.
pub const CATALOG_ENTRY_TYPE: &str = "youtube";

/// Publisher reference embedded in a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PublisherRef {
    pub id: String,
    pub name: String,
    pub avatar: String,
}

/// Browsable record of a successfully published video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CatalogEntry {
    pub title: String,
    /// Progressive rendition URL
    pub video_url: String,
    /// Adaptive-streaming manifest URL
    pub hls_url: String,
    pub thumbnail: String,
    pub language: String,
    pub source_link: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub topic: String,
    pub publisher: PublisherRef,
    pub country: String,
    /// Duration in seconds
    pub duration: u64,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub created_at: DateTime<Utc>,
}

impl CatalogEntry {
    /// Assemble an entry from acquisition output, provenance and publication URLs.
    pub fn from_parts(
        source: &SourceInfo,
        provenance: &ProvenanceMetadata,
        source_link: impl Into<String>,
        video_url: impl Into<String>,
        hls_url: impl Into<String>,
    ) -> Self {
        Self {
            title: source.title.clone(),
            video_url: video_url.into(),
            hls_url: hls_url.into(),
            thumbnail: source.thumbnail.clone(),
            language: provenance.language.clone(),
            source_link: source_link.into(),
            keywords: source.keywords.clone(),
            topic: provenance.publisher_topic.clone(),
            publisher: PublisherRef {
                id: provenance.publisher_id.clone(),
                name: provenance.publisher_name.clone(),
                avatar: provenance.publisher_avatar.clone(),
            },
            country: provenance.country.clone(),
            duration: source.duration_secs,
            entry_type: CATALOG_ENTRY_TYPE.to_string(),
            created_at: Utc::now(),
        }
    }
}
