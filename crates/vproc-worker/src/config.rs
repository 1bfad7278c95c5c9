//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Running stage is cancelled after this long
    pub soft_time_limit: Duration,
    /// Job future is dropped after this long
    pub hard_time_limit: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Work directory for transient job files
    pub work_dir: PathBuf,
    /// How often the worker should scan for orphaned pending jobs
    pub claim_interval: Duration,
    /// Minimum idle time before a pending job can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// How long one stream read blocks
    pub consume_block: Duration,
    /// Cookies file handed to yt-dlp
    pub ytdlp_cookies: Option<PathBuf>,
    /// Port for the Prometheus scrape listener
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            soft_time_limit: Duration::from_secs(3000),
            hard_time_limit: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(30),
            work_dir: std::env::temp_dir().join("vproc"),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(3900), // past the hard limit
            consume_block: Duration::from_secs(1),
            ytdlp_cookies: None,
            metrics_port: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS").unwrap_or(defaults.max_concurrent_jobs),
            soft_time_limit: env_parse("WORKER_SOFT_TIME_LIMIT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.soft_time_limit),
            hard_time_limit: env_parse("WORKER_HARD_TIME_LIMIT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.hard_time_limit),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            claim_interval: env_parse("WORKER_CLAIM_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_interval),
            claim_min_idle: env_parse("WORKER_CLAIM_MIN_IDLE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_min_idle),
            consume_block: env_parse("WORKER_CONSUME_BLOCK_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.consume_block),
            ytdlp_cookies: std::env::var("YTDLP_COOKIES_FILE")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            metrics_port: env_parse("METRICS_PORT"),
        }
    }

    /// Reject settings the executor cannot honor.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(WorkerError::config_error("WORKER_MAX_JOBS must be at least 1"));
        }
        if self.soft_time_limit >= self.hard_time_limit {
            return Err(WorkerError::config_error(format!(
                "soft time limit ({}s) must be below the hard time limit ({}s)",
                self.soft_time_limit.as_secs(),
                self.hard_time_limit.as_secs()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_are_valid() {
        let config = WorkerConfig::default();
        assert_eq!(config.soft_time_limit, Duration::from_secs(3000));
        assert_eq!(config.hard_time_limit, Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("WORKER_SOFT_TIME_LIMIT_SECS", "10");
        std::env::set_var("WORKER_HARD_TIME_LIMIT_SECS", "20");
        std::env::set_var("WORKER_MAX_JOBS", "oops");

        let config = WorkerConfig::from_env();
        assert_eq!(config.soft_time_limit, Duration::from_secs(10));
        assert_eq!(config.hard_time_limit, Duration::from_secs(20));
        assert_eq!(config.max_concurrent_jobs, 2);

        std::env::remove_var("WORKER_SOFT_TIME_LIMIT_SECS");
        std::env::remove_var("WORKER_HARD_TIME_LIMIT_SECS");
        std::env::remove_var("WORKER_MAX_JOBS");
    }

    #[test]
    fn test_validate_rejects_inverted_limits() {
        let config = WorkerConfig {
            soft_time_limit: Duration::from_secs(60),
            hard_time_limit: Duration::from_secs(60),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(WorkerError::ConfigError(_))));
    }
}
