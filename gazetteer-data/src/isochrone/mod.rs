//! Isochrone precomputation.
//!
//! [`seed_county`] samples a county on a square grid and caches drive-time
//! polygons for every grid origin and duration under the content hash of the
//! routing parameters.

mod grid;
mod seed;
mod telemetry;

pub use grid::grid_points;
pub use seed::{SeedError, SeedReport, SeedRequest, resolve_county, seed_county};
pub use telemetry::{LatencyRecorder, environment_metadata};
