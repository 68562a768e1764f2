//! County context payloads and the store-backed source that builds them.

use std::sync::Arc;

use gazetteer_core::{Crs, GeoId, Layer, SpatialStore, ToleranceTier, reproject};
use geo::{Contains, Coord, Line, MultiPolygon, Point, Rect};
use serde::Serialize;
use serde_json::Value;

use super::{ContextError, ContextMode, ContextSource};
use crate::geojson;

/// Metres per degree of latitude, used to widen the candidate box.
const METRES_PER_DEGREE: f64 = 111_320.0;

/// Population totals for the region itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContextTotals {
    /// Total population.
    pub total: u64,
    /// Adult population.
    pub adult: u64,
    /// Block groups counted.
    pub units: u64,
}

/// Block-group polygons of one county as a GeoJSON feature collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FullContext {
    /// Always `FeatureCollection`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// County identifier.
    pub region: GeoId,
    /// One feature per block group with `geoid`, `total` and `adult`.
    pub features: Vec<Value>,
    /// Totals over the county.
    pub totals: ContextTotals,
}

/// `[longitude, latitude, adult, owning county]`.
pub type LitePoint = (f64, f64, u64, GeoId);

/// Block-group centroids within a wide buffer of one county.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiteContext {
    /// County identifier.
    pub region: GeoId,
    /// Buffer used, in metres.
    pub buffer_m: f64,
    /// Populated centroids, each tagged with its own county.
    pub points: Vec<LitePoint>,
    /// Totals over the county only.
    pub totals: ContextTotals,
}

/// A resolved context of either mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ContextPayload {
    /// Polygons.
    Full(Arc<FullContext>),
    /// Points.
    Lite(Arc<LiteContext>),
}

impl ContextPayload {
    /// Mode this payload answers.
    #[must_use]
    pub fn mode(&self) -> ContextMode {
        match self {
            Self::Full(_) => ContextMode::Full,
            Self::Lite(_) => ContextMode::Lite,
        }
    }

    /// County the payload describes.
    #[must_use]
    pub fn region(&self) -> &GeoId {
        match self {
            Self::Full(full) => &full.region,
            Self::Lite(lite) => &lite.region,
        }
    }

    /// Totals over the county.
    #[must_use]
    pub fn totals(&self) -> ContextTotals {
        match self {
            Self::Full(full) => full.totals,
            Self::Lite(lite) => lite.totals,
        }
    }
}

/// Builds contexts from a [`SpatialStore`].
#[derive(Debug, Clone)]
pub struct StoreContextSource {
    store: Arc<SpatialStore>,
    lite_buffer_m: f64,
    full_tier: ToleranceTier,
}

impl StoreContextSource {
    /// Source over `store` using `lite_buffer_m` for lite contexts.
    #[must_use]
    pub fn new(store: Arc<SpatialStore>, lite_buffer_m: f64) -> Self {
        Self {
            store,
            lite_buffer_m,
            full_tier: ToleranceTier::Detail,
        }
    }

    fn store_error(region: &GeoId) -> impl FnOnce(gazetteer_core::StoreError) -> ContextError {
        let region = region.clone();
        move |source| ContextError::Store {
            region,
            source: Arc::new(source),
        }
    }

    fn full(&self, region: &GeoId) -> Result<FullContext, ContextError> {
        let units = self
            .store
            .units_in_county(region, Some(self.full_tier))
            .map_err(Self::store_error(region))?;
        let mut totals = ContextTotals::default();
        let mut features = Vec::with_capacity(units.len());
        for unit in units {
            totals.total += unit.population.total;
            totals.adult += unit.population.adult;
            totals.units += 1;
            let Some(geometry) = unit.geometry else {
                continue;
            };
            let mut properties = serde_json::Map::new();
            properties.insert("geoid".to_owned(), serde_json::json!(unit.id));
            geojson::insert_population(&mut properties, unit.population);
            features.push(geojson::feature(&geometry, properties));
        }
        Ok(FullContext {
            kind: "FeatureCollection",
            region: region.clone(),
            features,
            totals,
        })
    }

    fn lite(&self, region: &GeoId, outline: &MultiPolygon<f64>) -> Result<LiteContext, ContextError> {
        let Some(candidates_box) = widen(outline, self.lite_buffer_m) else {
            return Ok(LiteContext {
                region: region.clone(),
                buffer_m: self.lite_buffer_m,
                points: Vec::new(),
                totals: ContextTotals::default(),
            });
        };
        let planar = reproject(outline, Crs::Wgs84, Crs::ConusAlbers);
        let candidates = self
            .store
            .unit_centroids_in_bbox(candidates_box)
            .map_err(Self::store_error(region))?;

        let mut totals = ContextTotals::default();
        let mut points = Vec::new();
        for unit in candidates {
            let owner = unit.id.county();
            if owner == *region {
                totals.total += unit.population.total;
                totals.adult += unit.population.adult;
                totals.units += 1;
            }
            if unit.population.total == 0 {
                continue;
            }
            let centroid = unit.centroid;
            let projected = Crs::Wgs84.transform(Crs::ConusAlbers, centroid.0);
            if within_distance(&planar, projected, self.lite_buffer_m) {
                points.push((centroid.x(), centroid.y(), unit.population.adult, owner));
            }
        }
        Ok(LiteContext {
            region: region.clone(),
            buffer_m: self.lite_buffer_m,
            points,
            totals,
        })
    }
}

impl ContextSource for StoreContextSource {
    fn load(&self, region: &GeoId, mode: ContextMode) -> Result<ContextPayload, ContextError> {
        if region.layer() != Layer::County {
            return Err(ContextError::InvalidRegion {
                region: region.to_string(),
            });
        }
        let county = self
            .store
            .boundary(region, None)
            .map_err(Self::store_error(region))?
            .ok_or_else(|| ContextError::UnknownRegion {
                region: region.clone(),
            })?;
        match mode {
            ContextMode::Full => self.full(region).map(|full| ContextPayload::Full(Arc::new(full))),
            ContextMode::Lite => self
                .lite(region, &county.geometry)
                .map(|lite| ContextPayload::Lite(Arc::new(lite))),
        }
    }
}

/// Longitude/latitude box around `outline` grown by at least `metres`.
fn widen(outline: &MultiPolygon<f64>, metres: f64) -> Option<Rect<f64>> {
    use geo::BoundingRect;
    let bounds = outline.bounding_rect()?;
    let dlat = metres / METRES_PER_DEGREE;
    let widest = bounds.min().y.abs().max(bounds.max().y.abs()) + dlat;
    let cos = widest.min(89.0).to_radians().cos();
    let dlon = metres / (METRES_PER_DEGREE * cos);
    Some(Rect::new(
        Coord {
            x: bounds.min().x - dlon,
            y: bounds.min().y - dlat,
        },
        Coord {
            x: bounds.max().x + dlon,
            y: bounds.max().y + dlat,
        },
    ))
}

/// Whether `point` lies inside `area` or within `metres` of its boundary.
fn within_distance(area: &MultiPolygon<f64>, point: Coord<f64>, metres: f64) -> bool {
    if area.contains(&Point::from(point)) {
        return true;
    }
    area.0
        .iter()
        .flat_map(|polygon| std::iter::once(polygon.exterior()).chain(polygon.interiors()))
        .flat_map(|ring| ring.lines())
        .any(|line| segment_distance(line, point) <= metres)
}

fn segment_distance(line: Line<f64>, point: Coord<f64>) -> f64 {
    let delta = line.delta();
    let length_sq = delta.x * delta.x + delta.y * delta.y;
    let t = if length_sq == 0.0 {
        0.0
    } else {
        (((point.x - line.start.x) * delta.x + (point.y - line.start.y) * delta.y) / length_sq)
            .clamp(0.0, 1.0)
    };
    let nearest = Coord {
        x: line.start.x + t * delta.x,
        y: line.start.y + t * delta.y,
    };
    (point.x - nearest.x).hypot(point.y - nearest.y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gazetteer_core::test_support::SampleWorld;
    use rstest::{fixture, rstest};

    const FIFTY_MILES_M: f64 = 80_467.0;

    #[fixture]
    fn source() -> StoreContextSource {
        StoreContextSource::new(Arc::new(SampleWorld::store().expect("store")), FIFTY_MILES_M)
    }

    fn county(raw: &str) -> GeoId {
        raw.parse().expect("county id")
    }

    #[rstest]
    fn full_contexts_list_every_block_group(source: StoreContextSource) {
        let ContextPayload::Full(full) = source.load(&county("06001"), ContextMode::Full).expect("context")
        else {
            panic!("expected a full context");
        };
        assert_eq!(full.features.len(), 2);
        assert_eq!(full.totals, ContextTotals { total: 250, adult: 125, units: 2 });
        assert_eq!(full.features[0]["properties"]["geoid"], "060010001001");
    }

    #[rstest]
    fn lite_contexts_reach_into_neighbours(source: StoreContextSource) {
        let ContextPayload::Lite(lite) = source.load(&county("06003"), ContextMode::Lite).expect("context")
        else {
            panic!("expected a lite context");
        };
        let owners: Vec<&str> = lite.points.iter().map(|point| point.3.as_str()).collect();
        assert!(owners.contains(&"06003"));
        assert!(owners.contains(&"32031"), "owners: {owners:?}");
        assert!(!owners.contains(&"06001"), "owners: {owners:?}");

        let own_adults: u64 = lite
            .points
            .iter()
            .filter(|point| point.3.as_str() == "06003")
            .map(|point| point.2)
            .sum();
        assert_eq!(own_adults, lite.totals.adult);
        assert_eq!(lite.totals.units, 2);
    }

    #[rstest]
    fn unknown_counties_are_reported(source: StoreContextSource) {
        assert!(matches!(
            source.load(&county("41039"), ContextMode::Full),
            Err(ContextError::UnknownRegion { .. })
        ));
    }

    #[rstest]
    fn states_are_not_regions(source: StoreContextSource) {
        assert!(matches!(
            source.load(&county("06"), ContextMode::Lite),
            Err(ContextError::InvalidRegion { .. })
        ));
    }

    #[rstest]
    #[case(Coord { x: 5.0, y: 5.0 }, 0.0, true)]
    #[case(Coord { x: 15.0, y: 5.0 }, 4.0, false)]
    #[case(Coord { x: 15.0, y: 5.0 }, 5.0, true)]
    #[case(Coord { x: 13.0, y: 14.0 }, 5.0, true)]
    fn distance_to_area(#[case] point: Coord<f64>, #[case] metres: f64, #[case] expected: bool) {
        let area = gazetteer_core::test_support::square(0.0, 0.0, 10.0);
        assert_eq!(within_distance(&area, point, metres), expected);
    }

    #[rstest]
    fn shared_payloads_serialise_as_their_contents(source: StoreContextSource) {
        let full = source.load(&county("06001"), ContextMode::Full).expect("full");
        let value = serde_json::to_value(&full).expect("serialise full");
        assert_eq!(value["type"], "FeatureCollection");
        assert_eq!(value["region"], "06001");
        assert_eq!(value["totals"]["adult"], 125);

        let lite = source.load(&county("06003"), ContextMode::Lite).expect("lite");
        let value = serde_json::to_value(&lite).expect("serialise lite");
        let first = &value["points"][0];
        assert_eq!(first.as_array().map(Vec::len), Some(4));
        assert!(value.get("features").is_none());
    }
}
