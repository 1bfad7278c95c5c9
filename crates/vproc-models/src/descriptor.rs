//! Job descriptors: the immutable unit of work handed to the runner.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Namespace used for published assets when the submitter gives none.
pub const DEFAULT_TARGET_IDENTIFIER: &str = "videos";

/// Resolution tier used for stream selection when the submitter gives none.
pub const DEFAULT_RESOLUTION: &str = "360p";

/// Validation errors raised while building a [`JobDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("video_url is required")]
    MissingSourceReference,

    #[error("invalid resolution tier '{0}', expected a value like '360p'")]
    InvalidResolution(String),
}

/// A vertical resolution tier such as `360p`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResolutionTier(u32);

impl JsonSchema for ResolutionTier {
    fn schema_name() -> String {
        "ResolutionTier".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        String::json_schema(gen)
    }
}

impl ResolutionTier {
    /// Vertical pixel count of the tier.
    pub fn height(&self) -> u32 {
        self.0
    }
}

impl Default for ResolutionTier {
    fn default() -> Self {
        Self(360)
    }
}

impl FromStr for ResolutionTier {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_suffix('p')
            .or_else(|| trimmed.strip_suffix('P'))
            .unwrap_or(trimmed);

        match digits.parse::<u32>() {
            Ok(height) if height > 0 => Ok(Self(height)),
            _ => Err(DescriptorError::InvalidResolution(s.to_string())),
        }
    }
}

impl TryFrom<String> for ResolutionTier {
    type Error = DescriptorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResolutionTier> for String {
    fn from(tier: ResolutionTier) -> Self {
        tier.to_string()
    }
}

impl fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}p", self.0)
    }
}

/// Publisher and locale attributes that accompany feed-triggered jobs.
///
/// Presence of provenance is what makes a successful job produce a
/// catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProvenanceMetadata {
    pub publisher_id: String,
    pub publisher_avatar: String,
    pub publisher_name: String,
    /// Topic identifier the publisher filed the video under
    pub publisher_topic: String,
    pub language: String,
    pub country: String,
}

/// Immutable description of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobDescriptor {
    /// Locator of the source video
    pub source_reference: String,

    /// Namespace used when naming the published asset
    pub target_identifier: String,

    /// Requested resolution tier, only used for source stream selection
    pub preferred_resolution: ResolutionTier,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<ProvenanceMetadata>,
}

impl JobDescriptor {
    /// Build a descriptor, applying defaults for absent or blank optional fields.
    pub fn new(
        source_reference: impl Into<String>,
        target_identifier: Option<&str>,
        preferred_resolution: Option<&str>,
    ) -> Result<Self, DescriptorError> {
        let source_reference = source_reference.into().trim().to_string();
        if source_reference.is_empty() {
            return Err(DescriptorError::MissingSourceReference);
        }

        let target_identifier = target_identifier
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_TARGET_IDENTIFIER)
            .to_string();

        let preferred_resolution = preferred_resolution
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_RESOLUTION)
            .parse()?;

        Ok(Self {
            source_reference,
            target_identifier,
            preferred_resolution,
            provenance: None,
        })
    }

    /// Attach provenance metadata.
    pub fn with_provenance(mut self, provenance: ProvenanceMetadata) -> Self {
        self.provenance = Some(provenance);
        self
    }

    pub fn has_provenance(&self) -> bool {
        self.provenance.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let d = JobDescriptor::new("https://youtu.be/abc", None, None).unwrap();
        assert_eq!(d.target_identifier, "videos");
        assert_eq!(d.preferred_resolution.height(), 360);
        assert!(!d.has_provenance());
    }

    #[test]
    fn test_blank_optionals_use_defaults() {
        let d = JobDescriptor::new("https://youtu.be/abc", Some("  "), Some("")).unwrap();
        assert_eq!(d.target_identifier, DEFAULT_TARGET_IDENTIFIER);
        assert_eq!(d.preferred_resolution.to_string(), DEFAULT_RESOLUTION);
    }

    #[test]
    fn test_missing_source_rejected() {
        assert_eq!(
            JobDescriptor::new("   ", None, None),
            Err(DescriptorError::MissingSourceReference)
        );
    }

    #[test]
    fn test_resolution_parsing() {
        assert_eq!("720p".parse::<ResolutionTier>().unwrap().height(), 720);
        assert_eq!("1080".parse::<ResolutionTier>().unwrap().height(), 1080);
        assert!("hd".parse::<ResolutionTier>().is_err());
        assert!("0p".parse::<ResolutionTier>().is_err());
        assert!(JobDescriptor::new("https://youtu.be/abc", None, Some("best")).is_err());
    }

    #[test]
    fn test_serde_keeps_tier_as_string() {
        let d = JobDescriptor::new("https://youtu.be/abc", Some("clips"), Some("480p")).unwrap();
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["preferred_resolution"], "480p");
        assert!(json.get("provenance").is_none());

        let back: JobDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, d);
    }
}
