//! Transcode worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vproc_firestore::{FirestoreClient, FirestoreResultSink};
use vproc_media::{check_ffmpeg, check_ytdlp, FfmpegTranscoder, YtDlpFetcher};
use vproc_queue::JobQueue;
use vproc_storage::CloudinaryStore;
use vproc_worker::{metrics, JobExecutor, JobRunner, PipelineStages, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vproc=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }

    info!("Starting vproc-worker");

    let config = WorkerConfig::from_env();
    config.validate()?;
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        metrics::install_exporter(port).context("Failed to install metrics exporter")?;
        info!("Metrics exporter listening on port {}", port);
    }

    let ffmpeg = check_ffmpeg().context("ffmpeg is required")?;
    let ytdlp = check_ytdlp().context("yt-dlp is required")?;
    info!(ffmpeg = %ffmpeg.display(), ytdlp = %ytdlp.display(), "Media tools found");

    let mut fetcher = YtDlpFetcher::new();
    if let Some(cookies) = &config.ytdlp_cookies {
        fetcher = fetcher.with_cookies(cookies);
    }

    let store = CloudinaryStore::from_env().context("Failed to configure Cloudinary")?;
    let firestore = FirestoreClient::from_env()
        .await
        .context("Failed to create Firestore client")?;
    let queue = JobQueue::from_env().context("Failed to create job queue")?;

    let stages = PipelineStages {
        fetcher: Arc::new(fetcher),
        transcoder: Arc::new(FfmpegTranscoder::new().with_timeout(config.hard_time_limit.as_secs())),
        store: Arc::new(store),
        sink: Arc::new(FirestoreResultSink::new(firestore)),
    };
    let runner = JobRunner::new(stages, config.work_dir.clone(), config.soft_time_limit);
    let executor = Arc::new(JobExecutor::new(config, queue, runner)?);

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        return Err(e.into());
    }

    info!("Worker shutdown complete");
    Ok(())
}
