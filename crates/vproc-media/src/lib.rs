//! Media stages of the rendition pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Cancellation support via tokio watch channels
//! - Source acquisition through yt-dlp behind [`SourceFetcher`]
//! - Rendition encoding through FFmpeg behind [`Transcoder`]

pub mod acquire;
pub mod command;
pub mod error;
pub mod progress;
pub mod transcode;

pub use acquire::{select_stream, AcquiredSource, SourceFetcher, YtDlpFetcher};
pub use command::{check_ffmpeg, check_ytdlp, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use progress::FfmpegProgress;
pub use transcode::{FfmpegTranscoder, Transcoder};
