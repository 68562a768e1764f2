//! Background ingestion triggered over HTTP.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use gazetteer_data::ingest::{IngestError, IngestReport, Ingestor};
use log::{error, info, warn};

/// A seeding run the server can launch.
#[async_trait]
pub trait SeedJob: Send + Sync + 'static {
    /// Run every needed ingestion stage.
    async fn seed(&self) -> Result<IngestReport, IngestError>;
}

#[async_trait]
impl SeedJob for Ingestor {
    async fn seed(&self) -> Result<IngestReport, IngestError> {
        self.run().await
    }
}

/// Result of asking for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedStart {
    /// A new run was spawned.
    Started,
    /// A run is still in progress; nothing was spawned.
    AlreadyRunning,
}

impl SeedStart {
    /// Status label reported to clients.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::AlreadyRunning => "already_running",
        }
    }
}

/// Runs at most one [`SeedJob`] at a time on the Tokio runtime.
pub struct SeedLauncher {
    job: Arc<dyn SeedJob>,
    running: Arc<AtomicBool>,
}

impl std::fmt::Debug for SeedLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedLauncher")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Clears the running flag when the task ends, including by panic.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SeedLauncher {
    /// Launcher for `job`.
    #[must_use]
    pub fn new(job: Arc<dyn SeedJob>) -> Self {
        Self {
            job,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a run is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn a run unless one is already going.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> SeedStart {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return SeedStart::AlreadyRunning;
        }
        let guard = RunningGuard(Arc::clone(&self.running));
        let job = Arc::clone(&self.job);
        tokio::spawn(async move {
            let _guard = guard;
            info!("background seeding started");
            match job.seed().await {
                Ok(report) if report.is_success() => info!(
                    "background seeding finished: {} completed, {} skipped",
                    report.completed.len(),
                    report.skipped.len()
                ),
                Ok(report) => warn!(
                    "background seeding finished with {} failure(s)",
                    report.failures.len()
                ),
                Err(err) => error!("background seeding failed: {err}"),
            }
        });
        SeedStart::Started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Notify;
    use rstest::rstest;

    /// Job that blocks until released.
    #[derive(Default)]
    struct GatedJob {
        release: Notify,
    }

    #[async_trait]
    impl SeedJob for GatedJob {
        async fn seed(&self) -> Result<IngestReport, IngestError> {
            self.release.notified().await;
            Ok(IngestReport::default())
        }
    }

    async fn wait_until_idle(launcher: &SeedLauncher) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while launcher.is_running() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("seeding should finish");
    }

    #[rstest]
    #[tokio::test]
    async fn only_one_run_at_a_time() {
        let job = Arc::new(GatedJob::default());
        let launcher = SeedLauncher::new(job.clone());

        assert_eq!(launcher.start(), SeedStart::Started);
        assert!(launcher.is_running());
        assert_eq!(launcher.start(), SeedStart::AlreadyRunning);

        job.release.notify_one();
        wait_until_idle(&launcher).await;
        assert_eq!(launcher.start(), SeedStart::Started);
        job.release.notify_one();
        wait_until_idle(&launcher).await;
    }

    #[rstest]
    #[case(SeedStart::Started, "started")]
    #[case(SeedStart::AlreadyRunning, "already_running")]
    fn labels(#[case] start: SeedStart, #[case] label: &str) {
        assert_eq!(start.as_str(), label);
    }
}
