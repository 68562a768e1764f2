//! County context aggregation with single-flight fetches.
//!
//! [`ContextAggregator::context`] shares one in-flight fetch per region and
//! mode, cancels fetches for other keys when a new request arrives, and
//! bounds each fetch with a per-mode timeout. Every request takes a sequence
//! number; only the most recently issued request may publish into the
//! current slot, and a lite context never displaces a published full context
//! for the same region. Resolved contexts are kept for the life of the
//! process.

mod payload;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use gazetteer_core::{GeoId, StoreError};
use log::{debug, warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use payload::{
    ContextPayload, ContextTotals, FullContext, LiteContext, LitePoint, StoreContextSource,
};

/// Fifty miles in metres.
pub const DEFAULT_LITE_BUFFER_M: f64 = 80_467.0;

/// Which context to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextMode {
    /// Block-group polygons of the region.
    Full,
    /// Centroid points around the region.
    Lite,
}

impl ContextMode {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Lite => "lite",
        }
    }
}

/// Failures while building a context. Timeouts and cancellation are not
/// errors; see [`ContextOutcome`].
#[derive(Debug, Clone, Error)]
pub enum ContextError {
    /// The identifier is not a county.
    #[error("{region} is not a county identifier")]
    InvalidRegion {
        /// Rejected identifier.
        region: String,
    },
    /// No county with this identifier is loaded.
    #[error("no county {region}")]
    UnknownRegion {
        /// Requested county.
        region: GeoId,
    },
    /// A store query failed.
    #[error("context query for {region} failed: {source}")]
    Store {
        /// County being built.
        region: GeoId,
        /// Store failure.
        #[source]
        source: Arc<StoreError>,
    },
    /// The blocking build task panicked.
    #[error("context task for {region} failed: {message}")]
    Task {
        /// County being built.
        region: GeoId,
        /// Join failure message.
        message: String,
    },
}

/// Builds one context synchronously; called on the blocking pool.
pub trait ContextSource: Send + Sync + 'static {
    /// Build the `mode` context of `region`.
    fn load(&self, region: &GeoId, mode: ContextMode) -> Result<ContextPayload, ContextError>;
}

/// Aggregator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextConfig {
    /// Bound on lite fetches.
    pub lite_timeout: Duration,
    /// Bound on full fetches.
    pub full_timeout: Duration,
    /// Lite buffer around the region, metres.
    pub lite_buffer_m: f64,
    /// Cancel in-flight fetches for other keys when a request arrives.
    pub cancel_superseded: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            lite_timeout: Duration::from_secs(10),
            full_timeout: Duration::from_secs(30),
            lite_buffer_m: DEFAULT_LITE_BUFFER_M,
            cancel_superseded: true,
        }
    }
}

impl ContextConfig {
    /// Set both timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, lite: Duration, full: Duration) -> Self {
        self.lite_timeout = lite;
        self.full_timeout = full;
        self
    }

    /// Enable or disable cancelling superseded fetches.
    #[must_use]
    pub fn with_cancel_superseded(mut self, cancel: bool) -> Self {
        self.cancel_superseded = cancel;
        self
    }

    fn timeout_for(&self, mode: ContextMode) -> Duration {
        match mode {
            ContextMode::Full => self.full_timeout,
            ContextMode::Lite => self.lite_timeout,
        }
    }
}

/// Result of one request.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextOutcome {
    /// The context was built or found in the cache.
    Ready(ContextPayload),
    /// The fetch exceeded its timeout.
    TimedOut,
    /// A newer request cancelled the fetch.
    Cancelled,
}

impl ContextOutcome {
    /// Status label reported to clients.
    #[must_use]
    pub const fn status(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ok",
            Self::TimedOut => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Outcome plus the request's sequence bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextResponse {
    /// What the request produced.
    pub outcome: ContextOutcome,
    /// Sequence number taken by the request.
    pub sequence: u64,
    /// Whether the result became the current context.
    pub published: bool,
}

/// The context most recently published.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentContext {
    /// Sequence number of the publishing request.
    pub sequence: u64,
    /// Published payload.
    pub payload: ContextPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FlightKey {
    region: GeoId,
    mode: ContextMode,
}

type FlightResult = Result<ContextOutcome, ContextError>;

struct Flight {
    id: u64,
    token: CancellationToken,
    future: Shared<BoxFuture<'static, FlightResult>>,
}

/// Coordinates concurrent context requests.
pub struct ContextAggregator {
    source: Arc<dyn ContextSource>,
    config: ContextConfig,
    sequence: AtomicU64,
    flight_ids: AtomicU64,
    flights: Mutex<HashMap<FlightKey, Flight>>,
    resolved: Mutex<HashMap<FlightKey, ContextPayload>>,
    current: Mutex<Option<CurrentContext>>,
}

impl std::fmt::Debug for ContextAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextAggregator")
            .field("config", &self.config)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ContextAggregator {
    /// Aggregator over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn ContextSource>, config: ContextConfig) -> Self {
        Self {
            source,
            config,
            sequence: AtomicU64::new(0),
            flight_ids: AtomicU64::new(0),
            flights: Mutex::new(HashMap::new()),
            resolved: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
        }
    }

    /// Aggregator settings.
    #[must_use]
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Fetches currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        lock(&self.flights).len()
    }

    /// Contexts cached so far.
    #[must_use]
    pub fn cached(&self) -> usize {
        lock(&self.resolved).len()
    }

    /// Most recently published context.
    #[must_use]
    pub fn current(&self) -> Option<CurrentContext> {
        lock(&self.current).clone()
    }

    /// Build or reuse the `mode` context of `region`.
    ///
    /// Timeouts and cancellation resolve to soft outcomes. Build failures
    /// are returned and never cached.
    pub async fn context(
        &self,
        region: &GeoId,
        mode: ContextMode,
    ) -> Result<ContextResponse, ContextError> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let key = FlightKey {
            region: region.clone(),
            mode,
        };
        if self.config.cancel_superseded {
            self.cancel_others(&key);
        }

        let cached = lock(&self.resolved).get(&key).cloned();
        let outcome = match cached {
            Some(payload) => ContextOutcome::Ready(payload),
            None => {
                let (flight_id, future) = self.join_or_start(&key);
                let result = future.await;
                self.land(&key, flight_id);
                let outcome = result?;
                if let ContextOutcome::Ready(payload) = &outcome {
                    lock(&self.resolved).insert(key, payload.clone());
                }
                outcome
            }
        };

        let published = match &outcome {
            ContextOutcome::Ready(payload) => self.publish(sequence, payload),
            ContextOutcome::TimedOut | ContextOutcome::Cancelled => false,
        };
        Ok(ContextResponse {
            outcome,
            sequence,
            published,
        })
    }

    fn cancel_others(&self, key: &FlightKey) {
        lock(&self.flights).retain(|other, flight| {
            if other == key {
                return true;
            }
            debug!(
                "cancelling superseded {} context fetch for {}",
                other.mode.as_str(),
                other.region
            );
            flight.token.cancel();
            false
        });
    }

    fn join_or_start(&self, key: &FlightKey) -> (u64, Shared<BoxFuture<'static, FlightResult>>) {
        let mut flights = lock(&self.flights);
        if let Some(flight) = flights.get(key) {
            return (flight.id, flight.future.clone());
        }
        let id = self.flight_ids.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        let future = fly(
            Arc::clone(&self.source),
            key.clone(),
            self.config.timeout_for(key.mode),
            token.clone(),
        )
        .boxed()
        .shared();
        flights.insert(
            key.clone(),
            Flight {
                id,
                token,
                future: future.clone(),
            },
        );
        (id, future)
    }

    fn land(&self, key: &FlightKey, id: u64) {
        let mut flights = lock(&self.flights);
        if flights.get(key).is_some_and(|flight| flight.id == id) {
            flights.remove(key);
        }
    }

    fn publish(&self, sequence: u64, payload: &ContextPayload) -> bool {
        let mut current = lock(&self.current);
        if sequence != self.sequence.load(Ordering::SeqCst) {
            debug!(
                "discarding stale {} context for {} (request {sequence})",
                payload.mode().as_str(),
                payload.region()
            );
            return false;
        }
        if let Some(existing) = current.as_ref()
            && existing.payload.region() == payload.region()
            && existing.payload.mode() == ContextMode::Full
            && payload.mode() == ContextMode::Lite
        {
            return false;
        }
        *current = Some(CurrentContext {
            sequence,
            payload: payload.clone(),
        });
        true
    }
}

async fn fly(
    source: Arc<dyn ContextSource>,
    key: FlightKey,
    timeout: Duration,
    token: CancellationToken,
) -> FlightResult {
    let region = key.region.clone();
    let task = tokio::task::spawn_blocking(move || source.load(&key.region, key.mode));
    tokio::select! {
        () = token.cancelled() => Ok(ContextOutcome::Cancelled),
        joined = tokio::time::timeout(timeout, task) => match joined {
            Err(_) => {
                warn!("context fetch for {region} timed out after {timeout:?}");
                Ok(ContextOutcome::TimedOut)
            }
            Ok(Err(join)) => Err(ContextError::Task {
                region,
                message: join.to_string(),
            }),
            Ok(Ok(result)) => result.map(ContextOutcome::Ready),
        },
    }
}

#[cfg(test)]
mod tests;
