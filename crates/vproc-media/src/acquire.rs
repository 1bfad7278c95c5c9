//! Source acquisition: resolve a source reference with yt-dlp, pick a
//! progressive stream at the requested tier, and download it.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info};

use vproc_models::{ResolutionTier, SelectedStream, SourceInfo};

use crate::command::{check_ytdlp, wait_cancelled};
use crate::error::{MediaError, MediaResult};

/// Program name used for every invocation.
pub const YTDLP_BIN: &str = "yt-dlp";

/// Output of a successful acquisition.
#[derive(Debug, Clone)]
pub struct AcquiredSource {
    /// Local path of the downloaded source file
    pub path: PathBuf,
    /// Size of the downloaded file in bytes
    pub size_bytes: u64,
    pub info: SourceInfo,
}

/// Acquisition capability.
///
/// `destination_stem` is a token-derived path without extension; the
/// implementation appends the container extension of the stream it picks.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(
        &self,
        source_reference: &str,
        tier: ResolutionTier,
        destination_stem: &Path,
        cancel: watch::Receiver<bool>,
    ) -> MediaResult<AcquiredSource>;
}

/// Subset of `yt-dlp -J` output used for stream selection.
#[derive(Debug, Clone, Deserialize)]
pub struct YtDlpInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub formats: Vec<YtDlpFormat>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct YtDlpFormat {
    pub format_id: String,
    #[serde(default)]
    pub ext: String,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub filesize_approx: Option<u64>,
}

impl YtDlpFormat {
    fn has_codec(codec: &Option<String>) -> bool {
        matches!(codec.as_deref(), Some(c) if c != "none")
    }

    /// Single-file stream carrying both audio and video over plain HTTP.
    pub fn is_progressive(&self) -> bool {
        let direct = matches!(self.protocol.as_deref(), None | Some("http") | Some("https"));
        direct && Self::has_codec(&self.vcodec) && Self::has_codec(&self.acodec)
    }

    fn size_hint(&self) -> Option<u64> {
        self.filesize.or(self.filesize_approx)
    }
}

/// Pick the progressive stream matching `tier`.
///
/// Candidates are ordered by height ascending, then mp4 before other
/// containers, then smallest known size.
pub fn select_stream(formats: &[YtDlpFormat], tier: ResolutionTier) -> MediaResult<SelectedStream> {
    let mut candidates: Vec<&YtDlpFormat> = formats
        .iter()
        .filter(|f| f.is_progressive() && f.height == Some(tier.height()))
        .collect();

    candidates.sort_by_key(|f| (f.height, f.ext != "mp4", f.size_hint().unwrap_or(u64::MAX)));

    match candidates.first() {
        Some(f) => Ok(SelectedStream {
            format_id: f.format_id.clone(),
            height: tier.height(),
            ext: if f.ext.is_empty() { "mp4".to_string() } else { f.ext.clone() },
            filesize: f.size_hint(),
        }),
        None => {
            let mut available: Vec<u32> = formats
                .iter()
                .filter(|f| f.is_progressive())
                .filter_map(|f| f.height)
                .collect();
            available.sort_unstable();
            available.dedup();
            Err(MediaError::NoMatchingStream {
                requested: tier.to_string(),
                available,
            })
        }
    }
}

/// [`SourceFetcher`] backed by the yt-dlp CLI.
#[derive(Debug, Clone, Default)]
pub struct YtDlpFetcher {
    /// Optional cookies file passed to every invocation
    cookies_path: Option<PathBuf>,
}

impl YtDlpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookies(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookies_path = Some(path.into());
        self
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(YTDLP_BIN);
        cmd.arg("--no-playlist").arg("--no-warnings");
        if let Some(cookies) = &self.cookies_path {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Resolve source metadata without downloading.
    pub async fn resolve(
        &self,
        source_reference: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> MediaResult<YtDlpInfo> {
        let mut cmd = self.base_command();
        cmd.arg("-J").arg(source_reference);

        let output = tokio::select! {
            out = cmd.output() => out?,
            _ = wait_cancelled(Some(cancel)) => return Err(MediaError::Cancelled),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("yt-dlp stderr: {}", stderr);
            let error_msg = last_line(&stderr).unwrap_or("Unknown error");
            return Err(MediaError::source_unavailable(error_msg));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }

    async fn download(
        &self,
        source_reference: &str,
        format_id: &str,
        output_path: &Path,
        cancel: &mut watch::Receiver<bool>,
    ) -> MediaResult<()> {
        let mut cmd = self.base_command();
        cmd.arg("--no-progress")
            .arg("-f")
            .arg(format_id)
            .arg("-o")
            .arg(output_path)
            .arg(source_reference);

        let output = tokio::select! {
            out = cmd.output() => out?,
            _ = wait_cancelled(Some(cancel)) => return Err(MediaError::Cancelled),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("yt-dlp stderr: {}", stderr);
            let error_msg = last_line(&stderr).unwrap_or("Unknown error");
            return Err(MediaError::download_failed(format!("yt-dlp failed: {}", error_msg)));
        }

        if !output_path.exists() {
            return Err(MediaError::download_failed("Output file not created"));
        }

        Ok(())
    }
}

#[async_trait]
impl SourceFetcher for YtDlpFetcher {
    async fn fetch(
        &self,
        source_reference: &str,
        tier: ResolutionTier,
        destination_stem: &Path,
        mut cancel: watch::Receiver<bool>,
    ) -> MediaResult<AcquiredSource> {
        check_ytdlp()?;

        let started = Instant::now();
        let info = self.resolve(source_reference, &mut cancel).await?;
        let stream = select_stream(&info.formats, tier)?;

        let path = destination_stem.with_extension(&stream.ext);
        info!(
            source = %source_reference,
            format_id = %stream.format_id,
            height = stream.height,
            "Downloading source to {}",
            path.display()
        );

        self.download(source_reference, &stream.format_id, &path, &mut cancel)
            .await?;

        let size_bytes = tokio::fs::metadata(&path).await?.len();
        let elapsed = started.elapsed();
        metrics::histogram!("vproc_acquisition_duration_seconds").record(elapsed.as_secs_f64());
        info!(
            size_mb = size_bytes as f64 / (1024.0 * 1024.0),
            elapsed_ms = elapsed.as_millis() as u64,
            "Source downloaded"
        );

        let source_info = SourceInfo {
            id: info.id,
            title: info.title,
            thumbnail: info.thumbnail.unwrap_or_default(),
            keywords: info.tags.unwrap_or_default(),
            duration_secs: info.duration.map(|d| d.round() as u64).unwrap_or_default(),
            stream,
        };

        Ok(AcquiredSource {
            path,
            size_bytes,
            info: source_info,
        })
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(id: &str, ext: &str, height: u32, vcodec: &str, acodec: &str) -> YtDlpFormat {
        YtDlpFormat {
            format_id: id.to_string(),
            ext: ext.to_string(),
            height: Some(height),
            vcodec: Some(vcodec.to_string()),
            acodec: Some(acodec.to_string()),
            protocol: Some("https".to_string()),
            filesize: None,
            filesize_approx: None,
        }
    }

    #[test]
    fn test_selects_progressive_mp4_at_tier() {
        let formats = vec![
            format("134", "mp4", 360, "avc1", "none"),
            format("243", "webm", 360, "vp9", "opus"),
            format("18", "mp4", 360, "avc1", "mp4a"),
            format("22", "mp4", 720, "avc1", "mp4a"),
        ];

        let stream = select_stream(&formats, "360p".parse().unwrap()).unwrap();
        assert_eq!(stream.format_id, "18");
        assert_eq!(stream.ext, "mp4");
        assert_eq!(stream.height, 360);
    }

    #[test]
    fn test_adaptive_streams_ignored() {
        let mut hls = format("95", "mp4", 360, "avc1", "mp4a");
        hls.protocol = Some("m3u8_native".to_string());
        let formats = vec![hls, format("134", "mp4", 360, "avc1", "none")];

        let err = select_stream(&formats, "360p".parse().unwrap()).unwrap_err();
        assert!(matches!(err, MediaError::NoMatchingStream { .. }));
    }

    #[test]
    fn test_no_match_reports_available_heights() {
        let formats = vec![
            format("22", "mp4", 720, "avc1", "mp4a"),
            format("18", "mp4", 360, "avc1", "mp4a"),
            format("18b", "webm", 360, "vp9", "opus"),
        ];

        match select_stream(&formats, "480p".parse().unwrap()) {
            Err(MediaError::NoMatchingStream {
                requested,
                available,
            }) => {
                assert_eq!(requested, "480p");
                assert_eq!(available, vec![360, 720]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ytdlp_json() {
        let json = r#"{
            "id": "abc",
            "title": "Example",
            "thumbnail": "https://i.ytimg.com/vi/abc/hq.jpg",
            "tags": ["a", "b"],
            "duration": 92.6,
            "formats": [
                {"format_id": "18", "ext": "mp4", "height": 360, "vcodec": "avc1.42001E",
                 "acodec": "mp4a.40.2", "protocol": "https", "filesize": 1048576},
                {"format_id": "sb0", "ext": "mhtml", "vcodec": "none", "acodec": "none",
                 "protocol": "mhtml"}
            ]
        }"#;

        let info: YtDlpInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.formats.len(), 2);
        let stream = select_stream(&info.formats, "360p".parse().unwrap()).unwrap();
        assert_eq!(stream.filesize, Some(1048576));
    }

    #[test]
    fn test_last_line() {
        assert_eq!(
            last_line("WARNING: x\nERROR: Video unavailable\n\n"),
            Some("ERROR: Video unavailable")
        );
        assert_eq!(last_line(""), None);
    }
}
