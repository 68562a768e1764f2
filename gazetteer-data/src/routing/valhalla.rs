//! Request and response bodies for Valhalla's isochrone service.
//!
//! See: <https://valhalla.github.io/valhalla/api/isochrone/api-reference/>

use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};

/// Isochrone request body.
#[derive(Debug, Serialize)]
pub struct IsochroneRequest<'a> {
    /// Single origin.
    pub locations: [Location; 1],
    /// Costing profile.
    pub costing: &'a str,
    /// Requested contours.
    pub contours: Vec<ContourRequest>,
    /// Ask for polygons rather than lines.
    pub polygons: bool,
    /// Denoise factor.
    pub denoise: f64,
    /// Generalisation tolerance in metres.
    pub generalize: f64,
}

/// An origin in the request.
#[derive(Debug, Serialize)]
pub struct Location {
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lon: f64,
}

/// One requested contour.
#[derive(Debug, Serialize)]
pub struct ContourRequest {
    /// Minutes.
    pub time: u32,
}

/// Isochrone response: a GeoJSON feature collection, or an error object.
#[derive(Debug, Deserialize)]
pub struct IsochroneResponse {
    /// Contour features.
    #[serde(default)]
    pub features: Vec<ContourFeature>,
    /// Engine error code when the request failed.
    pub error_code: Option<i64>,
    /// Engine error message when the request failed.
    pub error: Option<String>,
}

impl IsochroneResponse {
    /// Check whether the response carries contours rather than an error.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error_code.is_none() && self.error.is_none()
    }
}

/// One contour feature.
#[derive(Debug, Deserialize)]
pub struct ContourFeature {
    /// Feature properties.
    #[serde(default)]
    pub properties: ContourProperties,
    /// Feature geometry.
    pub geometry: Option<ContourGeometry>,
}

/// Properties of a contour feature.
#[derive(Debug, Default, Deserialize)]
pub struct ContourProperties {
    /// Contour value in minutes.
    pub contour: Option<f64>,
}

/// Contour geometry; anything other than polygons is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContourGeometry {
    /// A single polygon.
    Polygon {
        /// Rings of `[lon, lat]` positions.
        coordinates: Vec<Vec<Vec<f64>>>,
    },
    /// Several polygons.
    MultiPolygon {
        /// Polygons of rings of `[lon, lat]` positions.
        coordinates: Vec<Vec<Vec<Vec<f64>>>>,
    },
    /// Lines or points, returned when polygons were not requested.
    #[serde(other)]
    Other,
}

impl ContourGeometry {
    /// Convert to a `geo` multipolygon; lines and degenerate rings yield
    /// nothing.
    #[must_use]
    pub fn to_multi_polygon(&self) -> Option<MultiPolygon<f64>> {
        let polygons: Vec<Polygon<f64>> = match self {
            Self::Polygon { coordinates } => polygon(coordinates).into_iter().collect(),
            Self::MultiPolygon { coordinates } => {
                coordinates.iter().filter_map(|rings| polygon(rings)).collect()
            }
            Self::Other => Vec::new(),
        };
        (!polygons.is_empty()).then(|| MultiPolygon::new(polygons))
    }
}

fn polygon(rings: &[Vec<Vec<f64>>]) -> Option<Polygon<f64>> {
    let mut rings = rings.iter().filter_map(|ring| line_string(ring));
    let exterior = rings.next()?;
    Some(Polygon::new(exterior, rings.collect()))
}

fn line_string(positions: &[Vec<f64>]) -> Option<LineString<f64>> {
    let coords: Vec<Coord<f64>> = positions
        .iter()
        .filter_map(|position| match position.as_slice() {
            [x, y, ..] => Some(Coord { x: *x, y: *y }),
            _ => None,
        })
        .collect();
    (coords.len() >= 4).then(|| LineString::new(coords))
}
