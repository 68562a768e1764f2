//! Test utilities for routing providers.
//!
//! [`StubIsochroneProvider`] answers without any network access and records
//! every call so tests can assert on batching.

use std::sync::Mutex;

use gazetteer_core::{IsochroneContour, IsochroneError, IsochroneProvider, RoutingParams};
use geo::{Coord, MultiPolygon, Rect};

use super::provider::validate_durations;

/// Stub [`IsochroneProvider`] for testing.
///
/// # Example
///
/// ```
/// use gazetteer_core::{IsochroneProvider, RoutingParams};
/// use gazetteer_data::routing::test_support::StubIsochroneProvider;
/// use geo::Coord;
///
/// let provider = StubIsochroneProvider::with_squares();
/// let contours = provider.isochrones(
///     Coord { x: -122.0, y: 37.0 },
///     &[10, 20],
///     &RoutingParams::default(),
/// )?;
/// assert_eq!(contours.len(), 2);
/// assert_eq!(provider.calls().len(), 1);
/// # Ok::<(), gazetteer_core::IsochroneError>(())
/// ```
#[derive(Debug)]
pub struct StubIsochroneProvider {
    response: StubResponse,
    calls: Mutex<Vec<(Coord<f64>, Vec<u32>)>>,
}

#[derive(Debug, Clone)]
enum StubResponse {
    Squares,
    Error(IsochroneError),
    FailWest(f64),
    EmptyWest(f64),
}

impl StubIsochroneProvider {
    /// Answer every duration with a square around the origin whose half-width
    /// is one thousandth of a degree per minute.
    #[must_use]
    pub fn with_squares() -> Self {
        Self::from_response(StubResponse::Squares)
    }

    /// Fail every call with `error`.
    #[must_use]
    pub fn with_error(error: IsochroneError) -> Self {
        Self::from_response(StubResponse::Error(error))
    }

    /// Answer with squares east of `longitude` and fail with an empty
    /// response west of it.
    #[must_use]
    pub fn failing_west_of(longitude: f64) -> Self {
        Self::from_response(StubResponse::FailWest(longitude))
    }

    /// Answer with squares east of `longitude` and with empty polygons west
    /// of it, which the store refuses to keep.
    #[must_use]
    pub fn empty_west_of(longitude: f64) -> Self {
        Self::from_response(StubResponse::EmptyWest(longitude))
    }

    fn from_response(response: StubResponse) -> Self {
        Self {
            response,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Calls received so far: origin and requested durations.
    #[must_use]
    pub fn calls(&self) -> Vec<(Coord<f64>, Vec<u32>)> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

fn square_contours(origin: Coord<f64>, durations: &[u32]) -> Vec<IsochroneContour> {
    durations
        .iter()
        .map(|&minutes| {
            let half = f64::from(minutes) / 1000.0;
            let rect = Rect::new(
                Coord {
                    x: origin.x - half,
                    y: origin.y - half,
                },
                Coord {
                    x: origin.x + half,
                    y: origin.y + half,
                },
            );
            IsochroneContour {
                minutes,
                polygon: MultiPolygon::new(vec![rect.to_polygon()]),
            }
        })
        .collect()
}

impl IsochroneProvider for StubIsochroneProvider {
    fn isochrones(
        &self,
        origin: Coord<f64>,
        durations: &[u32],
        _params: &RoutingParams,
    ) -> Result<Vec<IsochroneContour>, IsochroneError> {
        validate_durations(durations)?;
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((origin, durations.to_vec()));
        }
        match &self.response {
            StubResponse::Squares => Ok(square_contours(origin, durations)),
            StubResponse::Error(error) => Err(error.clone()),
            StubResponse::FailWest(longitude) if origin.x < *longitude => {
                Err(IsochroneError::EmptyResponse)
            }
            StubResponse::EmptyWest(longitude) if origin.x < *longitude => Ok(durations
                .iter()
                .map(|&minutes| IsochroneContour {
                    minutes,
                    polygon: MultiPolygon::new(Vec::new()),
                })
                .collect()),
            StubResponse::FailWest(_) | StubResponse::EmptyWest(_) => {
                Ok(square_contours(origin, durations))
            }
        }
    }
}
