//! Rendition encoding profile.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Video codec (H.264)
pub const RENDITION_VIDEO_CODEC: &str = "libx264";
/// Audio codec
pub const RENDITION_AUDIO_CODEC: &str = "aac";
/// Encoder preset; slowest preset for the smallest file at the given quality
pub const RENDITION_PRESET: &str = "veryslow";
/// Constant Rate Factor
pub const RENDITION_CRF: u8 = 30;
/// Audio bitrate
pub const RENDITION_AUDIO_BITRATE: &str = "128k";
/// Output height in pixels; width follows the aspect ratio, rounded to even
pub const RENDITION_HEIGHT: u32 = 360;

/// Encoding profile applied to every rendition.
///
/// The pipeline only ever uses [`EncodingProfile::default`]; the fields exist so
/// the command line can be built and recorded from a single value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EncodingProfile {
    pub height: u32,
    pub codec: String,
    pub preset: String,
    /// Constant Rate Factor (quality, 0-51, lower is better)
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,
}

impl Default for EncodingProfile {
    fn default() -> Self {
        Self {
            height: RENDITION_HEIGHT,
            codec: RENDITION_VIDEO_CODEC.to_string(),
            preset: RENDITION_PRESET.to_string(),
            crf: RENDITION_CRF,
            audio_codec: RENDITION_AUDIO_CODEC.to_string(),
            audio_bitrate: RENDITION_AUDIO_BITRATE.to_string(),
        }
    }
}

impl EncodingProfile {
    /// Scale filter keeping the aspect ratio with an even width.
    pub fn scale_filter(&self) -> String {
        format!("scale=-2:{}", self.height)
    }

    /// Convert to FFmpeg output arguments.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        vec![
            "-vf".to_string(),
            self.scale_filter(),
            "-c:v".to_string(),
            self.codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile() {
        let profile = EncodingProfile::default();
        assert_eq!(profile.scale_filter(), "scale=-2:360");
        assert_eq!(profile.crf, 30);
        assert_eq!(profile.preset, "veryslow");
    }

    #[test]
    fn test_ffmpeg_args() {
        let args = EncodingProfile::default().to_ffmpeg_args();
        let joined = args.join(" ");
        assert_eq!(
            joined,
            "-vf scale=-2:360 -c:v libx264 -preset veryslow -crf 30 -c:a aac -b:a 128k"
        );
    }
}
