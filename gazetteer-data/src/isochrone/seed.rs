use std::time::Instant;

use gazetteer_core::{
    BoundaryFeature, GeoId, IsochroneKey, IsochroneProvider, IsochroneRunRecord, LatencySummary,
    Layer, MAX_CONTOURS_PER_REQUEST, RoutingParams, SpatialStore, StoreError,
};
use log::{debug, info, warn};
use thiserror::Error;

use super::grid::grid_points;
use super::telemetry::{LatencyRecorder, environment_metadata};
use crate::unix_now;

/// Errors that stop a seeding run before it starts.
#[derive(Debug, Error)]
pub enum SeedError {
    /// No state matches the identifier or name.
    #[error("unknown state {state:?}")]
    UnknownState {
        /// Requested state.
        state: String,
    },
    /// No county of that name in the state.
    #[error("no county named {county:?} in state {state}")]
    UnknownCounty {
        /// Resolved state identifier.
        state: GeoId,
        /// Requested county name.
        county: String,
    },
    /// The grid spacing is not a positive number of metres.
    #[error("grid spacing must be a positive number of metres, got {spacing}")]
    InvalidSpacing {
        /// Rejected spacing.
        spacing: f64,
    },
    /// No durations were requested.
    #[error("at least one duration is required")]
    NoDurations,
    /// A store read or write failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What to seed.
#[derive(Debug, Clone)]
pub struct SeedRequest {
    /// State identifier or name.
    pub state: String,
    /// County name, with or without the " County" suffix.
    pub county: String,
    /// Grid spacing in metres.
    pub grid_spacing_m: f64,
    /// Routing parameters; their content hash namespaces the cache.
    pub params: RoutingParams,
    /// Routing endpoint, recorded in the audit row.
    pub endpoint: String,
    /// Operator label used when the host name is unavailable.
    pub operator: String,
}

impl SeedRequest {
    /// Request with default routing parameters and a 5 km grid.
    #[must_use]
    pub fn new(state: impl Into<String>, county: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            county: county.into(),
            grid_spacing_m: 5_000.0,
            params: RoutingParams::default(),
            endpoint: String::new(),
            operator: "gazetteer".to_owned(),
        }
    }

    /// Set the grid spacing.
    #[must_use]
    pub fn with_spacing(mut self, metres: f64) -> Self {
        self.grid_spacing_m = metres;
        self
    }

    /// Set the routing parameters.
    #[must_use]
    pub fn with_params(mut self, params: RoutingParams) -> Self {
        self.params = params;
        self
    }

    /// Set the endpoint recorded in the audit row.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Outcome of one seeding run.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedReport {
    /// Audit row id.
    pub run_id: i64,
    /// County seeded.
    pub county: GeoId,
    /// Content hash of the routing parameters.
    pub params_hash: String,
    /// Grid origins inside the county.
    pub grid_points: u64,
    /// Routing calls made.
    pub requests: u64,
    /// Failed routing calls plus isochrones the store could not look up or keep.
    pub failures: u64,
    /// Isochrones written.
    pub inserted: u64,
    /// Isochrones already cached, skipped before or at insert.
    pub skipped: u64,
    /// Routing latency summary.
    pub latency: Option<LatencySummary>,
}

#[derive(Debug, Default)]
struct RunStats {
    requests: u64,
    failures: u64,
    inserted: u64,
    skipped: u64,
    latencies: LatencyRecorder,
}

/// Precompute isochrones over a grid covering one county.
///
/// Each grid origin only asks the provider for durations that have no cache
/// entry under the run's parameter hash, at most
/// [`MAX_CONTOURS_PER_REQUEST`] per call. A failing call is logged and
/// counted; its durations stay missing for the next run. Every run appends
/// one audit row, so re-running a fully seeded county makes no routing calls
/// and inserts nothing.
pub fn seed_county<P>(
    store: &SpatialStore,
    provider: &P,
    request: &SeedRequest,
) -> Result<SeedReport, SeedError>
where
    P: IsochroneProvider + ?Sized,
{
    if !(request.grid_spacing_m.is_finite() && request.grid_spacing_m > 0.0) {
        return Err(SeedError::InvalidSpacing {
            spacing: request.grid_spacing_m,
        });
    }
    let durations = RoutingParams::with_durations(request.params.durations.iter().copied()).durations;
    if durations.is_empty() {
        return Err(SeedError::NoDurations);
    }
    let started_at = unix_now();
    let county = resolve_county(store, &request.state, &request.county)?;
    let params_hash = request.params.content_hash();
    let origins = grid_points(&county.geometry, request.grid_spacing_m);
    info!(
        "seeding {} ({}) with {} grid points, durations {durations:?}",
        county.name,
        county.id,
        origins.len()
    );

    let mut stats = RunStats::default();
    for origin in &origins {
        let mut missing = Vec::new();
        for &minutes in &durations {
            let key = IsochroneKey {
                origin: *origin,
                minutes,
                params_hash: params_hash.clone(),
            };
            match store.isochrone_exists(&key) {
                Ok(true) => stats.skipped += 1,
                Ok(false) => missing.push(minutes),
                Err(err) => {
                    warn!("cache lookup at {origin:?} for {minutes} min failed: {err}");
                    stats.failures += 1;
                }
            }
        }
        for chunk in missing.chunks(MAX_CONTOURS_PER_REQUEST) {
            stats.requests += 1;
            let began = Instant::now();
            let result = provider.isochrones(origin.to_lonlat(), chunk, &request.params);
            stats.latencies.record(began.elapsed());
            let contours = match result {
                Ok(contours) => contours,
                Err(err) => {
                    warn!("isochrone request at {origin:?} for {chunk:?} failed: {err}");
                    stats.failures += 1;
                    continue;
                }
            };
            for contour in contours.into_iter().filter(|c| chunk.contains(&c.minutes)) {
                let key = IsochroneKey {
                    origin: *origin,
                    minutes: contour.minutes,
                    params_hash: params_hash.clone(),
                };
                match store.insert_isochrone(&key, &contour.polygon, unix_now()) {
                    Ok(true) => stats.inserted += 1,
                    Ok(false) => stats.skipped += 1,
                    Err(err) => {
                        warn!("storing {} min isochrone at {origin:?} failed: {err}", key.minutes);
                        stats.failures += 1;
                    }
                }
            }
        }
    }

    let latency = stats.latencies.summary();
    let run = IsochroneRunRecord {
        region: county.id.to_string(),
        params_hash: params_hash.clone(),
        grid_spacing_m: request.grid_spacing_m,
        grid_points: origins.len() as u64,
        requests: stats.requests,
        failures: stats.failures,
        inserted: stats.inserted,
        skipped: stats.skipped,
        latency,
        environment: environment_metadata(&request.endpoint, &request.operator),
        started_at,
        finished_at: unix_now(),
    };
    let run_id = store.record_isochrone_run(&run)?;
    info!(
        "seeded {}: {} inserted, {} skipped, {} failures over {} requests",
        county.id, stats.inserted, stats.skipped, stats.failures, stats.requests
    );
    Ok(SeedReport {
        run_id,
        county: county.id,
        params_hash,
        grid_points: run.grid_points,
        requests: stats.requests,
        failures: stats.failures,
        inserted: stats.inserted,
        skipped: stats.skipped,
        latency,
    })
}

/// Resolve a state by identifier or name, then a county by name within it.
pub fn resolve_county(
    store: &SpatialStore,
    state: &str,
    county: &str,
) -> Result<BoundaryFeature, SeedError> {
    let unknown_state = || SeedError::UnknownState {
        state: state.to_owned(),
    };
    let trimmed = state.trim();
    let state_feature = if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let id = GeoId::for_layer(trimmed, Layer::State).map_err(|_| unknown_state())?;
        store.boundary(&id, None)?
    } else {
        store.find_boundary_by_name(Layer::State, None, trimmed)?
    }
    .ok_or_else(unknown_state)?;
    debug!("resolved state {state:?} to {}", state_feature.id);

    store
        .find_boundary_by_name(Layer::County, Some(&state_feature.id), county)?
        .ok_or_else(|| SeedError::UnknownCounty {
            state: state_feature.id,
            county: county.to_owned(),
        })
}
