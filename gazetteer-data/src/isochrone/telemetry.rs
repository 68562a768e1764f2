//! Run statistics and environment metadata for seeding audits.

use std::time::Duration;

use gazetteer_core::LatencySummary;
use serde_json::{Value, json};

/// Per-call latencies collected during a run.
#[derive(Debug, Clone, Default)]
pub struct LatencyRecorder {
    samples_ms: Vec<u64>,
}

impl LatencyRecorder {
    /// Record one call.
    pub fn record(&mut self, elapsed: Duration) {
        self.samples_ms
            .push(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples_ms.len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples_ms.is_empty()
    }

    /// Minimum, mean, nearest-rank 95th percentile and maximum.
    ///
    /// ```
    /// use std::time::Duration;
    /// use gazetteer_data::isochrone::LatencyRecorder;
    ///
    /// let mut recorder = LatencyRecorder::default();
    /// for ms in 1..=20 {
    ///     recorder.record(Duration::from_millis(ms));
    /// }
    /// let summary = recorder.summary().expect("samples");
    /// assert_eq!((summary.min_ms, summary.p95_ms, summary.max_ms), (1, 19, 20));
    /// ```
    #[must_use]
    pub fn summary(&self) -> Option<LatencySummary> {
        let mut sorted = self.samples_ms.clone();
        sorted.sort_unstable();
        let count = sorted.len();
        let min_ms = *sorted.first()?;
        let max_ms = *sorted.last()?;
        let total: u128 = sorted.iter().map(|&ms| u128::from(ms)).sum();
        let mean_ms = u64::try_from(total / count as u128).unwrap_or(u64::MAX);
        // Nearest rank: ceil(0.95 * n), one-based.
        let rank = (count * 95).div_ceil(100).max(1);
        let p95_ms = sorted.get(rank - 1).copied().unwrap_or(max_ms);
        Some(LatencySummary {
            min_ms,
            mean_ms,
            p95_ms,
            max_ms,
        })
    }
}

/// Best-effort description of the machine and endpoint behind a run.
///
/// The host name comes from `HOSTNAME`, then `/etc/hostname`, then
/// `operator`.
#[must_use]
pub fn environment_metadata(endpoint: &str, operator: &str) -> Value {
    json!({
        "host": host_name(operator),
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoint": endpoint,
    })
}

fn host_name(operator: &str) -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|name| name.trim().to_owned())
                .filter(|name| !name.is_empty())
        })
        .unwrap_or_else(|| operator.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn empty_recorder_has_no_summary() {
        assert!(LatencyRecorder::default().summary().is_none());
    }

    #[rstest]
    #[case(&[40], 40)]
    #[case(&[10, 20], 20)]
    #[case(&[5, 1, 3, 2, 4], 5)]
    fn p95_uses_nearest_rank(#[case] samples: &[u64], #[case] expected: u64) {
        let mut recorder = LatencyRecorder::default();
        for &ms in samples {
            recorder.record(Duration::from_millis(ms));
        }
        assert_eq!(recorder.summary().map(|s| s.p95_ms), Some(expected));
    }

    #[rstest]
    fn mean_is_integer_average() {
        let mut recorder = LatencyRecorder::default();
        for ms in [10, 20, 31] {
            recorder.record(Duration::from_millis(ms));
        }
        assert_eq!(recorder.summary().map(|s| s.mean_ms), Some(20));
    }

    #[rstest]
    fn environment_names_endpoint_and_platform() {
        let value = environment_metadata("http://routing.test", "ops");
        assert_eq!(value["endpoint"], "http://routing.test");
        assert_eq!(value["os"], std::env::consts::OS);
        assert!(value["host"].as_str().is_some_and(|host| !host.is_empty()));
    }
}
