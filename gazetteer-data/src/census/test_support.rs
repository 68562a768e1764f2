//! In-memory counts source for tests.

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

use async_trait::async_trait;
use gazetteer_core::{GeoId, Population};

use super::{CensusError, CensusTable, CountsSource};
use crate::archive::TransportError;

/// Stub [`CountsSource`] answering from per-state tables.
///
/// States without a table yield an empty table. Leading calls can be made to
/// fail to exercise retries.
#[derive(Debug, Default)]
pub struct StubCountsSource {
    tables: HashMap<GeoId, CensusTable>,
    failures_remaining: Mutex<u32>,
    calls: Mutex<Vec<GeoId>>,
}

impl StubCountsSource {
    /// Serve counts for one block group.
    #[must_use]
    pub fn with_counts(mut self, id: GeoId, population: Population) -> Self {
        self.tables.entry(id.state()).or_default().insert(id, population);
        self
    }

    /// Fail the next `count` calls with a network error.
    #[must_use]
    pub fn failing_first(self, count: u32) -> Self {
        if let Ok(mut remaining) = self.failures_remaining.lock() {
            *remaining = count;
        }
        self
    }

    /// States requested so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<GeoId> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CountsSource for StubCountsSource {
    async fn fetch_counts(&self, state: &GeoId) -> Result<CensusTable, CensusError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(state.clone());
        }
        let should_fail = match self.failures_remaining.lock() {
            Ok(mut remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };
        if should_fail {
            return Err(CensusError::Transport {
                state: state.to_string(),
                source: TransportError::Network {
                    url: format!("stub://counts/{state}"),
                    source: io::Error::new(io::ErrorKind::ConnectionReset, "stub failure"),
                },
            });
        }
        Ok(self.tables.get(&state.state()).cloned().unwrap_or_default())
    }
}
