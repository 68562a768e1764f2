//! HTTP serving for the gazetteer.
//!
//! Responsibilities:
//! - Render Mapbox Vector Tiles from stored boundaries behind a memory and a
//!   persistent cache tier.
//! - Aggregate county contexts with single-flight fetches, sequence gating
//!   and cancellation of superseded work.
//! - Expose boundaries, contexts, status and seeding over axum.
//!
//! Boundaries:
//! - All SQLite access runs on the blocking pool.
//! - Ingestion itself lives in `gazetteer-data`; this crate only triggers it.

#![forbid(unsafe_code)]

pub mod api;
pub mod context;
mod error;
pub mod geojson;
pub mod seed;
mod state;
pub mod tiles;

use std::time::{SystemTime, UNIX_EPOCH};

pub use api::{router, serve};
pub use context::{ContextAggregator, ContextConfig, ContextMode, ContextOutcome};
pub use error::ServeError;
pub use seed::{SeedJob, SeedLauncher, SeedStart};
pub use state::{AppState, ServeConfig};
pub use tiles::{TileService, TileServiceConfig};

/// Seconds since the Unix epoch; clocks before 1970 read as zero.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
