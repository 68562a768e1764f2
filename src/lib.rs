//! Facade crate for the gazetteer.
//!
//! This crate re-exports the core domain types and exposes the store,
//! ingestion pipelines and HTTP service behind feature flags.

#![forbid(unsafe_code)]

pub use gazetteer_core::{
    AdminBoundary, BlockGroupUnit, BoundaryFeature, Crs, GeoId, GeoIdError, IsochroneContour,
    IsochroneError, IsochroneProvider, Layer, Population, RoutingParams, TileCoord, ToleranceTier,
};

#[cfg(feature = "store-sqlite")]
pub use gazetteer_core::{SpatialStore, StoreError, StoreStatus};

/// Upstream adapters, ingestion and batch maintenance.
#[cfg(feature = "ingest")]
pub use gazetteer_data as data;

#[cfg(feature = "serve")]
pub use gazetteer_serve::{AppState, ContextAggregator, ServeConfig, TileService, router, serve};
