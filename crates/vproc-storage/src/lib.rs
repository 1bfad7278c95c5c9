//! Media store client for publishing renditions.
//!
//! This crate provides:
//! - The [`MediaStore`] publication seam used by the job runner
//! - A Cloudinary upload API client with signed, streamed uploads
//! - Unique asset key generation under a target namespace

pub mod client;
pub mod error;
pub mod signing;
pub mod store;

pub use client::{CloudinaryConfig, CloudinaryStore};
pub use error::{StorageError, StorageResult};
pub use store::{asset_key, MediaStore, PublishedAsset};
