//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vproc_api::{create_router, metrics, ApiConfig, AppState, SubmissionFeedListener};
use vproc_firestore::{FeedCursorRepository, FirestoreClient, SubmissionFeed};
use vproc_queue::JobQueue;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

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

    info!("Starting vproc-api");

    let config = ApiConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);

    let queue = JobQueue::from_env().context("Failed to create job queue")?;
    queue.init().await.context("Failed to initialize job stream")?;
    let state = AppState::new(config.clone(), Arc::new(queue));

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("Failed to install metrics recorder")?)
    } else {
        None
    };

    let feed_listener = if config.feed.enabled {
        let firestore = FirestoreClient::from_env()
            .await
            .context("Failed to create Firestore client")?;
        let listener = SubmissionFeedListener::new(
            config.feed.clone(),
            Arc::new(SubmissionFeed::new(firestore.clone())),
            Arc::new(FeedCursorRepository::new(firestore)),
            state.submitter.clone(),
        );
        listener.start();
        Some(listener)
    } else {
        info!("Change-feed listener disabled");
        None
    };

    let rate_limiter = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            rate_limiter.prune();
        }
    });

    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid bind address")?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    if let Some(feed_listener) = feed_listener {
        feed_listener.stop().await;
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // Without a signal handler, run until the process is killed.
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
