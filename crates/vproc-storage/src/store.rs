//! Publication seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::error::StorageResult;

/// URLs of a published rendition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedAsset {
    /// Identifier assigned by the store
    pub public_id: String,
    /// Progressive (single file) URL
    pub secure_url: String,
    /// Adaptive-streaming manifest URL
    pub hls_url: String,
    /// Size reported by the store
    pub bytes: Option<u64>,
}

/// Publication capability.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Upload `path` under a fresh key in `target_identifier`.
    ///
    /// Each call publishes a new asset; nothing is overwritten.
    async fn publish(&self, path: &Path, target_identifier: &str) -> StorageResult<PublishedAsset>;
}

/// Fresh asset key `<target>/<random>`.
pub fn asset_key(target_identifier: &str) -> String {
    let namespace = target_identifier.trim_matches('/');
    let id = Uuid::new_v4().simple();
    if namespace.is_empty() {
        id.to_string()
    } else {
        format!("{}/{}", namespace, id)
    }
}
