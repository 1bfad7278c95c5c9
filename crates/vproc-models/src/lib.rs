//! Shared data models for the video rendition pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Job descriptors and provenance metadata
//! - The per-job state machine
//! - The fixed encoding profile
//! - Processing results and catalog entries
//! - Source stream information produced by acquisition

pub mod catalog;
pub mod descriptor;
pub mod encoding;
pub mod job;
pub mod result;
pub mod source;

// Re-export common types
pub use catalog::{CatalogEntry, PublisherRef, CATALOG_ENTRY_TYPE};
pub use descriptor::{
    DescriptorError, JobDescriptor, ProvenanceMetadata, ResolutionTier, DEFAULT_RESOLUTION,
    DEFAULT_TARGET_IDENTIFIER,
};
pub use encoding::EncodingProfile;
pub use job::{JobId, JobOrigin, JobState};
pub use result::ProcessingResult;
pub use source::{SelectedStream, SourceInfo};
