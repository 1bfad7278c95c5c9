//! Transcoding stage: encode a source into a rendition with the fixed profile.

use async_trait::async_trait;
use std::path::Path;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info};

use vproc_models::EncodingProfile;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Transcoding capability.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// The exact command line `transcode` will run for these arguments.
    fn command_line(&self, input: &Path, output: &Path, profile: &EncodingProfile) -> Vec<String>;

    /// Encode `input` into `output`, returning the rendition size in bytes.
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        profile: &EncodingProfile,
        cancel: watch::Receiver<bool>,
    ) -> MediaResult<u64>;
}

/// [`Transcoder`] backed by the FFmpeg CLI.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder {
    timeout_secs: Option<u64>,
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the encoder if it runs longer than `secs`.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    fn build_command(input: &Path, output: &Path, profile: &EncodingProfile) -> FfmpegCommand {
        FfmpegCommand::new(input, output).output_args(profile.to_ffmpeg_args())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn command_line(&self, input: &Path, output: &Path, profile: &EncodingProfile) -> Vec<String> {
        Self::build_command(input, output, profile).command_line()
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        profile: &EncodingProfile,
        cancel: watch::Receiver<bool>,
    ) -> MediaResult<u64> {
        if !input.exists() {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }

        let cmd = Self::build_command(input, output, profile);
        let mut runner = FfmpegRunner::new().with_cancel(cancel);
        if let Some(secs) = self.timeout_secs {
            runner = runner.with_timeout(secs);
        }

        info!(
            input = %input.display(),
            output = %output.display(),
            "Transcoding rendition"
        );
        let started = Instant::now();

        runner
            .run_with_progress(&cmd, |progress| {
                debug!(
                    out_time = %progress.out_time,
                    speed = progress.speed,
                    frame = progress.frame,
                    "Transcode progress"
                );
            })
            .await?;

        if !output.exists() {
            return Err(MediaError::encoding_failed(
                "FFmpeg exited successfully but produced no output",
                None,
                Some(0),
            ));
        }

        let size = tokio::fs::metadata(output).await?.len();
        let elapsed = started.elapsed();
        metrics::histogram!("vproc_transcode_duration_seconds").record(elapsed.as_secs_f64());
        info!(
            size_mb = size as f64 / (1024.0 * 1024.0),
            elapsed_ms = elapsed.as_millis() as u64,
            "Rendition encoded"
        );

        Ok(size)
    }
}
