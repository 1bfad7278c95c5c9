//! Application state.

use std::sync::Arc;

use vproc_queue::JobDispatch;

use crate::config::ApiConfig;
use crate::middleware::ClientRateLimiter;
use crate::services::Submitter;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub submitter: Submitter,
    pub rate_limiter: ClientRateLimiter,
}

impl AppState {
    pub fn new(config: ApiConfig, dispatch: Arc<dyn JobDispatch>) -> Self {
        let rate_limiter = ClientRateLimiter::new(config.rate_limit_rps);
        Self {
            config,
            submitter: Submitter::new(dispatch),
            rate_limiter,
        }
    }
}
