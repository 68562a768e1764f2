//! Upstream adapters and batch pipelines for the gazetteer.
//!
//! Responsibilities:
//! - Fetch boundary archives and population counts behind narrow traits.
//! - Parse zipped shapefiles and load them through the spatial store.
//! - Maintain simplified variants and precompute isochrones.
//!
//! Boundaries:
//! - Identifier rules, tiers and storage live in `gazetteer-core`.
//! - Async transports never run SQLite work on the executor; loads go
//!   through the blocking pool.

#![forbid(unsafe_code)]

pub mod archive;
pub mod census;
pub mod ingest;
pub mod isochrone;
pub mod routing;
pub mod simplify;
pub mod tiger;

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch; clocks before 1970 read as zero.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
