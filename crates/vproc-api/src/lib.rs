//! Axum HTTP API server.
//!
//! This crate provides:
//! - The video submission endpoint and task status lookup
//! - The change-feed listener that submits on new feed documents
//! - Rate limiting and request tracing
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{FeedConfig, SubmissionFeedListener, Submitter};
pub use state::AppState;
