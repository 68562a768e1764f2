//! Core domain types and storage for the gazetteer.
//!
//! Identifiers, layers and tolerance tiers are validated on construction so
//! downstream crates can trust them. The SQLite-backed [`SpatialStore`] is the
//! single source of truth for boundaries, block-group counts, simplified
//! variants and the persistent caches.

#![forbid(unsafe_code)]

mod boundary;
pub mod crs;
mod geoid;
mod isochrone;
#[cfg(feature = "store-sqlite")]
pub mod store;
mod tile;
mod tolerance;

#[cfg(all(feature = "store-sqlite", any(test, feature = "test-support")))]
#[doc(hidden)]
pub mod test_support;

pub use boundary::{
    AdminBoundary, BlockGroupUnit, BoundaryError, BoundaryFeature, Population, UnitRecord,
};
pub use crs::{Crs, reproject};
pub use geoid::{GeoId, GeoIdError, Layer};
pub use isochrone::{
    IsochroneContour, IsochroneError, IsochroneKey, IsochroneProvider, MAX_CONTOURS_PER_REQUEST,
    RoundedOrigin, RoutingParams,
};
#[cfg(feature = "store-sqlite")]
pub use store::{
    DEFAULT_BATCH_SIZE, DownloadRecord, IsochroneRunRecord, LatencySummary, LoadMode,
    LoadSession, LoadSummary, PendingVariant, SpatialStore, StoreError, StoreStatus,
    WriteOutcome,
};
pub use tile::{MAX_ZOOM, TileCoord, TileCoordError, WORLD_HALF_EXTENT_M};
pub use tolerance::{TOLERANCE_FLOOR_M, ToleranceTier, UnknownTier, tolerance_for_zoom};
