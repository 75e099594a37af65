//! Async wrapper that runs whole builds off the runtime threads.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{info, instrument};

use crate::harvest::{BuildStats, Context, ContextError};

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Build timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Build task panicked or was cancelled: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Build failed: {0}")]
    Build(#[from] ContextError),

    #[error("Semaphore error: {0}")]
    Semaphore(#[from] tokio::sync::AcquireError),
}

/// Statistics of one finished build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub stats: BuildStats,
    pub elapsed_ms: u64,
}

/// Runs builds in blocking tasks, a bounded number at a time.
pub struct BuildExecutor {
    semaphore: Arc<Semaphore>,
    build_timeout: Duration,
}

impl BuildExecutor {
    /// Creates an executor allowing `concurrency_limit` builds at once,
    /// each with a one hour timeout.
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit)),
            build_timeout: Duration::from_secs(3600),
        }
    }

    /// Sets the timeout for a whole build.
    pub fn with_timeout(mut self, build_timeout: Duration) -> Self {
        self.build_timeout = build_timeout;
        self
    }

    /// Sets up and processes `context`.
    ///
    /// The context is consumed; a build that times out keeps running on
    /// its blocking thread until it finishes on its own.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError`] if the build fails, panics or times out.
    #[instrument(skip(self, context), fields(packages = context.packages().len()))]
    pub async fn run(&self, mut context: Context) -> Result<BuildReport, ExecutorError> {
        let _permit = self.semaphore.acquire().await?;
        let start = Instant::now();
        info!("Starting build");

        let stats = timeout(
            self.build_timeout,
            tokio::task::spawn_blocking(move || {
                context.setup()?;
                context.process()
            }),
        )
        .await
        .map_err(|_| ExecutorError::Timeout {
            timeout_secs: self.build_timeout.as_secs(),
        })???;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(elapsed_ms, kept = stats.apps_kept, "Finished build");
        Ok(BuildReport { stats, elapsed_ms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;
    use crate::harvest::{MemoryPackage, Package};

    fn context(root: &std::path::Path) -> Context {
        let mut config = ContextConfig::default();
        config.basename = Some("test".to_string());
        config.output_dir = Some(root.join("out"));
        config.temp_dir = Some(root.join("tmp"));
        config.cache_dir = Some(root.join("cache"));
        let mut context = Context::new(config);
        context.add_package(Package::memory(
            MemoryPackage::new("lib", "1", "1", "x86_64").file("/usr/lib/libfoo.so.1", b"elf"),
        ));
        context
    }

    #[tokio::test]
    async fn test_run_reports_stats() {
        let dir = tempfile::tempdir().unwrap();
        let report = BuildExecutor::new(1)
            .run(context(dir.path()))
            .await
            .unwrap();
        assert_eq!(report.stats.packages_total, 1);
        assert_eq!(report.stats.packages_ignored, 1);
        assert!(dir.path().join("out/test-ignore.xml.gz").is_file());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["stats"]["packages_processed"], 1);
    }

    #[tokio::test]
    async fn test_setup_failure_is_reported() {
        let report = BuildExecutor::new(1)
            .run(Context::new(ContextConfig::default()))
            .await;
        assert!(matches!(
            report,
            Err(ExecutorError::Build(ContextError::MissingLocation(_)))
        ));
    }
}
