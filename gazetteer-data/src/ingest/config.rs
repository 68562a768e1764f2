use std::time::Duration;

use camino::Utf8PathBuf;
use gazetteer_core::{DEFAULT_BATCH_SIZE, GeoId};

use crate::archive::ArchiveCatalog;

/// Highest state identifier taken by default: the fifty states plus the
/// District of Columbia, excluding territories.
pub const MAX_STATE_FIPS: u8 = 56;

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Pause after the first failure.
    pub initial_backoff: Duration,
    /// Upper bound on any single pause.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy with no pauses, for tests and dry runs.
    #[must_use]
    pub const fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Pause taken after failed attempt number `attempt` (one-based).
    ///
    /// ```
    /// use std::time::Duration;
    /// use gazetteer_data::ingest::RetryPolicy;
    ///
    /// let policy = RetryPolicy::default();
    /// assert_eq!(policy.delay_after(1), Duration::from_secs(2));
    /// assert_eq!(policy.delay_after(3), Duration::from_secs(8));
    /// assert_eq!(policy.delay_after(30), Duration::from_secs(60));
    /// ```
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.initial_backoff
            .saturating_mul(1_u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Row counts above which a layer is considered loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedThresholds {
    /// Minimum state rows.
    pub states: u64,
    /// Minimum county rows.
    pub counties: u64,
}

impl Default for SeedThresholds {
    fn default() -> Self {
        Self {
            states: 50,
            counties: 3000,
        }
    }
}

/// Settings for an [`Ingestor`](super::Ingestor).
#[derive(Debug, Clone, Default)]
pub struct IngestConfig {
    /// Archive locations.
    pub catalog: ArchiveCatalog,
    /// Rows per load transaction; zero means the store default.
    pub batch_size: usize,
    /// Retry policy for each layer and scope.
    pub retry: RetryPolicy,
    /// Coordinator thresholds.
    pub thresholds: SeedThresholds,
    /// Block-group states; `None` means every loaded state up to
    /// [`MAX_STATE_FIPS`].
    pub states: Option<Vec<GeoId>>,
    /// Parent directory for downloads and unpacked archives.
    pub scratch_dir: Option<Utf8PathBuf>,
}

impl IngestConfig {
    /// Set the archive catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: ArchiveCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the coordinator thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: SeedThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Restrict block-group ingestion to `states`.
    #[must_use]
    pub fn with_states(mut self, states: impl IntoIterator<Item = GeoId>) -> Self {
        self.states = Some(states.into_iter().map(|id| id.state()).collect());
        self
    }

    /// Set the scratch directory.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Set the load batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub(crate) fn effective_batch_size(&self) -> usize {
        if self.batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            self.batch_size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 2)]
    #[case(2, 4)]
    #[case(3, 8)]
    #[case(4, 10)]
    fn backoff_doubles_up_to_the_cap(#[case] attempt: u32, #[case] expected_secs: u64) {
        let policy = RetryPolicy {
            attempts: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_after(attempt), Duration::from_secs(expected_secs));
    }

    #[rstest]
    fn states_are_normalised_to_state_ids() {
        let config = IngestConfig::default().with_states(["06001".parse::<GeoId>().expect("id")]);
        assert_eq!(config.states, Some(vec!["06".parse().expect("id")]));
    }

    #[rstest]
    fn zero_batch_means_default() {
        assert_eq!(IngestConfig::default().effective_batch_size(), DEFAULT_BATCH_SIZE);
    }
}
