//! Routing-engine isochrone clients.
//!
//! [`HttpIsochroneProvider`] posts Valhalla-style isochrone requests and
//! parses the GeoJSON contours that come back. The synchronous
//! [`gazetteer_core::IsochroneProvider`] trait keeps seeding usable from a
//! plain command-line process.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use gazetteer_core::{IsochroneProvider, RoutingParams};
//! use gazetteer_data::routing::{HttpIsochroneProvider, HttpIsochroneProviderConfig};
//! use geo::Coord;
//!
//! let config = HttpIsochroneProviderConfig::new("http://localhost:8002")
//!     .with_timeout(Duration::from_secs(60));
//! let provider = HttpIsochroneProvider::with_config(config)?;
//! let params = RoutingParams::with_durations([10, 20]);
//! let contours = provider.isochrones(Coord { x: -122.27, y: 37.80 }, &params.durations, &params)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod provider;
mod valhalla;

#[doc(hidden)]
pub mod test_support;

pub use provider::{
    DEFAULT_ROUTING_URL, DEFAULT_USER_AGENT, HttpIsochroneProvider, HttpIsochroneProviderConfig,
    ProviderBuildError,
};
