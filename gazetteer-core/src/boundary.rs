//! Boundary and demographic records as the store sees them.

use geo::{Centroid, MultiPolygon, Point};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geoid::{GeoId, Layer};

/// Population counts for one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Population {
    /// Total resident population.
    pub total: u64,
    /// Residents aged 18 and over.
    pub adult: u64,
}

impl Population {
    /// Construct counts.
    #[must_use]
    pub const fn new(total: u64, adult: u64) -> Self {
        Self { total, adult }
    }
}

impl std::ops::AddAssign for Population {
    fn add_assign(&mut self, rhs: Self) {
        self.total += rhs.total;
        self.adult += rhs.adult;
    }
}

/// Errors returned when constructing boundary records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoundaryError {
    /// The identifier does not belong to a boundary layer.
    #[error("{id} is not a state or county identifier")]
    NotABoundary {
        /// Offending identifier.
        id: GeoId,
    },
    /// The geometry holds no polygons.
    #[error("{id} has an empty geometry")]
    EmptyGeometry {
        /// Offending identifier.
        id: GeoId,
    },
}

/// A state or county outline.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminBoundary {
    /// Stable identifier.
    pub id: GeoId,
    /// Display name.
    pub name: String,
    /// Authoritative geometry in WGS84 longitude/latitude.
    pub geometry: MultiPolygon<f64>,
}

impl AdminBoundary {
    /// Validate and construct a boundary record.
    pub fn new(
        id: GeoId,
        name: impl Into<String>,
        geometry: MultiPolygon<f64>,
    ) -> Result<Self, BoundaryError> {
        if id.layer() == Layer::BlockGroup {
            return Err(BoundaryError::NotABoundary { id });
        }
        if geometry.0.is_empty() {
            return Err(BoundaryError::EmptyGeometry { id });
        }
        Ok(Self {
            id,
            name: name.into(),
            geometry,
        })
    }

    /// Layer of this boundary.
    #[must_use]
    pub fn layer(&self) -> Layer {
        self.id.layer()
    }

    /// Parent identifier: the owning state for counties, none for states.
    #[must_use]
    pub fn parent(&self) -> Option<GeoId> {
        match self.layer() {
            Layer::State => None,
            Layer::County | Layer::BlockGroup => Some(self.id.state()),
        }
    }
}

/// A census block group with its counts.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockGroupUnit {
    /// Twelve-digit identifier.
    pub id: GeoId,
    /// Population counts.
    pub population: Population,
    /// Authoritative geometry in WGS84 longitude/latitude.
    pub geometry: MultiPolygon<f64>,
}

impl BlockGroupUnit {
    /// Validate and construct a unit.
    pub fn new(
        id: GeoId,
        population: Population,
        geometry: MultiPolygon<f64>,
    ) -> Result<Self, BoundaryError> {
        if id.layer() != Layer::BlockGroup {
            return Err(BoundaryError::NotABoundary { id });
        }
        if geometry.0.is_empty() {
            return Err(BoundaryError::EmptyGeometry { id });
        }
        Ok(Self {
            id,
            population,
            geometry,
        })
    }

    /// Geometric centroid used for lite payloads and buffers.
    #[must_use]
    pub fn centroid(&self) -> Option<Point<f64>> {
        self.geometry.centroid()
    }
}

/// A boundary row read back from the store for rendering or export.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryFeature {
    /// Store row id, stable across reads.
    pub row_id: i64,
    /// Identifier.
    pub id: GeoId,
    /// Display name; block groups are labelled after their final digit.
    pub name: String,
    /// Geometry, simplified when a variant was requested and present.
    pub geometry: MultiPolygon<f64>,
    /// Counts aggregated from block groups, when requested.
    pub population: Option<Population>,
}

/// A block group read back from the store with its centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRecord {
    /// Identifier.
    pub id: GeoId,
    /// Counts.
    pub population: Population,
    /// Precomputed centroid.
    pub centroid: Point<f64>,
    /// Geometry when the query asked for it.
    pub geometry: Option<MultiPolygon<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Rect, coord};
    use rstest::rstest;

    fn square() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 2.0, y: 2.0 }).to_polygon(),
        ])
    }

    #[rstest]
    fn county_parent_is_state() {
        let county = AdminBoundary::new("06001".parse().expect("id"), "Alameda", square())
            .expect("county");
        assert_eq!(county.parent().map(String::from), Some("06".to_owned()));
        let state = AdminBoundary::new("06".parse().expect("id"), "California", square())
            .expect("state");
        assert_eq!(state.parent(), None);
    }

    #[rstest]
    fn rejects_block_group_as_boundary() {
        let err = AdminBoundary::new("060014001001".parse().expect("id"), "BG", square())
            .expect_err("block groups are units");
        assert!(matches!(err, BoundaryError::NotABoundary { .. }));
    }

    #[rstest]
    fn rejects_empty_geometry() {
        let err = BlockGroupUnit::new(
            "060014001001".parse().expect("id"),
            Population::new(1, 1),
            MultiPolygon::new(Vec::new()),
        )
        .expect_err("empty geometry");
        assert!(matches!(err, BoundaryError::EmptyGeometry { .. }));
    }

    #[rstest]
    fn unit_centroid_is_geometric_centre() {
        let unit = BlockGroupUnit::new(
            "060014001001".parse().expect("id"),
            Population::new(10, 8),
            square(),
        )
        .expect("unit");
        let centroid = unit.centroid().expect("centroid");
        assert!((centroid.x() - 1.0).abs() < 1e-12 && (centroid.y() - 1.0).abs() < 1e-12);
    }
}
