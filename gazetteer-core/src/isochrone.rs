//! Drive-time polygons and the provider seam to routing engines.
//!
//! The [`IsochroneProvider`] trait is synchronous so seeding can run from a
//! plain command-line process; HTTP implementations block on their own
//! runtime internally.

use geo::{Coord, MultiPolygon};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Routing engines cap the number of contours per request.
pub const MAX_CONTOURS_PER_REQUEST: usize = 4;

/// Scale used to round origins to four decimal places.
const ORIGIN_SCALE: f64 = 10_000.0;

/// Errors from [`IsochroneProvider::isochrones`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IsochroneError {
    /// No durations were requested.
    #[error("at least one duration is required")]
    EmptyInput,
    /// More durations than a single request may carry.
    #[error("{requested} durations requested; at most {MAX_CONTOURS_PER_REQUEST} per call")]
    TooManyContours {
        /// Number of durations passed.
        requested: usize,
    },
    /// The request exceeded its deadline.
    #[error("routing request to {url} timed out after {timeout_secs}s")]
    Timeout {
        /// Endpoint that timed out.
        url: String,
        /// Configured timeout.
        timeout_secs: u64,
    },
    /// The routing engine answered with a non-success status.
    #[error("routing request to {url} failed with HTTP {status}: {message}")]
    HttpError {
        /// Endpoint URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },
    /// The connection failed before a response arrived.
    #[error("routing request to {url} failed: {message}")]
    NetworkError {
        /// Endpoint URL.
        url: String,
        /// Error message.
        message: String,
    },
    /// The engine reported an application-level error.
    #[error("routing engine error {code}: {message}")]
    ServiceError {
        /// Engine error code.
        code: String,
        /// Engine error message.
        message: String,
    },
    /// The body could not be decoded.
    #[error("failed to parse routing response: {message}")]
    ParseError {
        /// Decoder message.
        message: String,
    },
    /// The engine returned no usable polygons.
    #[error("routing engine returned no contours")]
    EmptyResponse,
}

/// Request parameters shared by every call of a seeding run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingParams {
    /// Durations in minutes, kept sorted and unique.
    pub durations: Vec<u32>,
    /// Costing profile, for example `auto`.
    pub costing: String,
    /// Ask for polygons rather than lines.
    pub polygons: bool,
    /// Denoise factor between 0 and 1.
    pub denoise: f64,
    /// Generalisation tolerance in metres.
    pub generalize: f64,
}

impl Default for RoutingParams {
    fn default() -> Self {
        Self {
            durations: vec![10, 20, 30],
            costing: "auto".to_owned(),
            polygons: true,
            denoise: 0.5,
            generalize: 50.0,
        }
    }
}

impl RoutingParams {
    /// Parameters with the given durations and default routing options.
    #[must_use]
    pub fn with_durations(durations: impl IntoIterator<Item = u32>) -> Self {
        let mut durations: Vec<u32> = durations.into_iter().filter(|d| *d > 0).collect();
        durations.sort_unstable();
        durations.dedup();
        Self {
            durations,
            ..Self::default()
        }
    }

    /// Set the costing profile.
    #[must_use]
    pub fn with_costing(mut self, costing: impl Into<String>) -> Self {
        self.costing = costing.into();
        self
    }

    /// Set the denoise factor.
    #[must_use]
    pub fn with_denoise(mut self, denoise: f64) -> Self {
        self.denoise = denoise;
        self
    }

    /// Hex SHA-256 of the canonical request parameters.
    ///
    /// Any change to durations, costing or polygon options yields a different
    /// hash and therefore a disjoint cache namespace.
    ///
    /// ```
    /// use gazetteer_core::RoutingParams;
    ///
    /// let a = RoutingParams::with_durations([20, 10]);
    /// let b = RoutingParams::with_durations([10, 20]);
    /// assert_eq!(a.content_hash(), b.content_hash());
    /// assert_ne!(a.content_hash(), b.clone().with_costing("bicycle").content_hash());
    /// ```
    #[must_use]
    pub fn content_hash(&self) -> String {
        let mut durations = self.durations.clone();
        durations.sort_unstable();
        durations.dedup();
        // Fixed field order; floats are rendered with a fixed precision so the
        // digest never depends on formatter details.
        let canonical = serde_json::json!({
            "costing": self.costing,
            "denoise": format!("{:.4}", self.denoise),
            "durations": durations,
            "generalize": format!("{:.4}", self.generalize),
            "polygons": self.polygons,
        });
        hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
    }
}

/// Origin rounded to four decimal places, the precision of cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoundedOrigin {
    /// Latitude times 10⁴.
    pub lat_e4: i64,
    /// Longitude times 10⁴.
    pub lon_e4: i64,
}

impl RoundedOrigin {
    /// Round a longitude/latitude coordinate.
    #[must_use]
    pub fn from_lonlat(coord: Coord<f64>) -> Self {
        Self {
            lat_e4: scale(coord.y),
            lon_e4: scale(coord.x),
        }
    }

    /// Coordinate of the rounded origin.
    #[must_use]
    #[expect(
        clippy::cast_precision_loss,
        reason = "scaled degrees are far below 2^52"
    )]
    pub fn to_lonlat(self) -> Coord<f64> {
        Coord {
            x: self.lon_e4 as f64 / ORIGIN_SCALE,
            y: self.lat_e4 as f64 / ORIGIN_SCALE,
        }
    }
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "degrees times 10^4 always fit in i64"
)]
fn scale(degrees: f64) -> i64 {
    (degrees * ORIGIN_SCALE).round() as i64
}

/// Full cache key of one isochrone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IsochroneKey {
    /// Rounded origin.
    pub origin: RoundedOrigin,
    /// Duration in minutes.
    pub minutes: u32,
    /// Content hash of the request parameters.
    pub params_hash: String,
}

/// A single polygon returned for one duration.
#[derive(Debug, Clone, PartialEq)]
pub struct IsochroneContour {
    /// Duration in minutes.
    pub minutes: u32,
    /// Reachable area in WGS84 longitude/latitude.
    pub polygon: MultiPolygon<f64>,
}

/// Fetch drive-time polygons for one origin.
///
/// # Examples
///
/// ```
/// use geo::{Coord, MultiPolygon};
/// use gazetteer_core::{IsochroneContour, IsochroneError, IsochroneProvider, RoutingParams};
///
/// struct Nowhere;
///
/// impl IsochroneProvider for Nowhere {
///     fn isochrones(
///         &self,
///         _origin: Coord<f64>,
///         durations: &[u32],
///         _params: &RoutingParams,
///     ) -> Result<Vec<IsochroneContour>, IsochroneError> {
///         if durations.is_empty() {
///             return Err(IsochroneError::EmptyInput);
///         }
///         Ok(durations
///             .iter()
///             .map(|&minutes| IsochroneContour { minutes, polygon: MultiPolygon::new(vec![]) })
///             .collect())
///     }
/// }
///
/// let params = RoutingParams::default();
/// let contours = Nowhere.isochrones(Coord { x: -122.0, y: 37.0 }, &[10], &params)?;
/// assert_eq!(contours.len(), 1);
/// # Ok::<(), IsochroneError>(())
/// ```
pub trait IsochroneProvider {
    /// Return one contour per requested duration that the engine produced.
    ///
    /// Implementations must reject an empty `durations` slice with
    /// [`IsochroneError::EmptyInput`] and more than
    /// [`MAX_CONTOURS_PER_REQUEST`] durations with
    /// [`IsochroneError::TooManyContours`].
    fn isochrones(
        &self,
        origin: Coord<f64>,
        durations: &[u32],
        params: &RoutingParams,
    ) -> Result<Vec<IsochroneContour>, IsochroneError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn durations_are_normalised() {
        let params = RoutingParams::with_durations([30, 10, 0, 10]);
        assert_eq!(params.durations, vec![10, 30]);
    }

    #[rstest]
    #[case(RoutingParams::default().with_costing("pedestrian"))]
    #[case(RoutingParams::default().with_denoise(0.9))]
    #[case(RoutingParams::with_durations([10, 20]))]
    #[case(RoutingParams { polygons: false, ..RoutingParams::default() })]
    fn any_parameter_change_alters_hash(#[case] changed: RoutingParams) {
        assert_ne!(changed.content_hash(), RoutingParams::default().content_hash());
    }

    #[rstest]
    fn hash_is_stable_hex_sha256() {
        let hash = RoutingParams::default().content_hash();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, RoutingParams::default().content_hash());
    }

    #[rstest]
    fn rounding_keeps_four_decimals() {
        let origin = RoundedOrigin::from_lonlat(Coord {
            x: -122.271_449,
            y: 37.804_363,
        });
        assert_eq!(origin.lon_e4, -1_222_714);
        assert_eq!(origin.lat_e4, 378_044);
        let back = origin.to_lonlat();
        assert!((back.x + 122.2714).abs() < 1e-9);
    }
}
