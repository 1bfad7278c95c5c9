//! Source metadata produced by acquisition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The progressive stream chosen for download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SelectedStream {
    pub format_id: String,
    pub height: u32,
    /// Container extension (e.g. "mp4")
    pub ext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
}

/// Metadata of a resolved source video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SourceInfo {
    pub id: String,
    pub title: String,
    pub thumbnail: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub duration_secs: u64,
    pub stream: SelectedStream,
}
