//! Per-job transient files.
//!
//! Every path a job writes lives directly in the work directory and starts
//! with `<token>_`, so one prefix scan finds all of them, including partial
//! downloads left by yt-dlp.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::PipelineError;

#[derive(Debug)]
pub struct JobWorkspace {
    dir: PathBuf,
    token: String,
    swept: bool,
}

impl JobWorkspace {
    /// Allocate a fresh token in `dir`, creating the directory if needed.
    pub async fn create(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            token: Uuid::new_v4().simple().to_string(),
            swept: false,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Download destination without extension; the fetcher appends the
    /// selected stream's extension.
    pub fn source_stem(&self) -> PathBuf {
        self.dir.join(format!("{}_source", self.token))
    }

    pub fn rendition_path(&self) -> PathBuf {
        self.dir.join(format!("{}_rendition.mp4", self.token))
    }

    fn owns(&self, name: &str) -> bool {
        name.starts_with(&self.token) && name[self.token.len()..].starts_with('_')
    }

    /// Remove every file named for this job.
    ///
    /// Failures are logged and returned; they never fail the job.
    pub async fn sweep(&mut self) -> Vec<PipelineError> {
        self.swept = true;
        let mut failures = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return failures,
            Err(e) => {
                failures.push(PipelineError::CleanupFailed(format!(
                    "{}: {}",
                    self.dir.display(),
                    e
                )));
                return self.report(failures);
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    failures.push(PipelineError::CleanupFailed(e.to_string()));
                    break;
                }
            };
            let name = entry.file_name();
            if !self.owns(&name.to_string_lossy()) {
                continue;
            }
            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "Removed transient file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => failures.push(PipelineError::CleanupFailed(format!(
                    "{}: {}",
                    path.display(),
                    e
                ))),
            }
        }

        self.report(failures)
    }

    fn report(&self, failures: Vec<PipelineError>) -> Vec<PipelineError> {
        for failure in &failures {
            metrics::counter!("vproc_cleanup_failures_total").increment(1);
            warn!(token = %self.token, "{}", failure);
        }
        failures
    }

    fn sweep_blocking(&self) {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            if self.owns(&entry.file_name().to_string_lossy()) {
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    warn!(path = %entry.path().display(), "Best-effort cleanup failed: {}", e);
                }
            }
        }
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if !self.swept {
            debug!(token = %self.token, "Workspace dropped before sweep, cleaning up");
            self.sweep_blocking();
        }
    }
}
