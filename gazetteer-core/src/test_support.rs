//! Fixture builders shared by unit, integration and downstream tests.

use geo::{MultiPolygon, Rect, coord};

use crate::boundary::{AdminBoundary, BlockGroupUnit, Population};
use crate::geoid::GeoId;
use crate::store::{DEFAULT_BATCH_SIZE, LoadMode, SpatialStore, StoreError};

/// Axis-aligned square in longitude/latitude.
#[must_use]
pub fn square(min_lon: f64, min_lat: f64, size: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![
        Rect::new(
            coord! { x: min_lon, y: min_lat },
            coord! { x: min_lon + size, y: min_lat + size },
        )
        .to_polygon(),
    ])
}

fn id(raw: &str) -> GeoId {
    match GeoId::new(raw) {
        Ok(id) => id,
        Err(err) => panic!("fixture identifier {raw:?} is invalid: {err}"),
    }
}

/// State or county boundary with a square outline.
#[must_use]
pub fn boundary(raw_id: &str, name: &str, outline: MultiPolygon<f64>) -> AdminBoundary {
    match AdminBoundary::new(id(raw_id), name, outline) {
        Ok(boundary) => boundary,
        Err(err) => panic!("fixture boundary {raw_id} is invalid: {err}"),
    }
}

/// Block group with the given counts.
#[must_use]
pub fn unit(raw_id: &str, total: u64, adult: u64, outline: MultiPolygon<f64>) -> BlockGroupUnit {
    match BlockGroupUnit::new(id(raw_id), Population::new(total, adult), outline) {
        Ok(unit) => unit,
        Err(err) => panic!("fixture unit {raw_id} is invalid: {err}"),
    }
}

/// Small two-state world used across the test suites.
///
/// * State `06` spans -124..-114 by 32..42 with counties `06001`
///   (-122.5..-121.5 by 37..38) and `06003` (-120..-119 by 38..39).
/// * State `32` spans -120..-114 by 35..42 with county `32031`
///   (-119.5..-118.5 by 39..40), close enough to `06003` to fall within a
///   50-mile buffer.
/// * Each county holds two block groups splitting it east and west.
#[derive(Debug, Clone)]
pub struct SampleWorld {
    /// States and counties.
    pub boundaries: Vec<AdminBoundary>,
    /// Block groups with counts.
    pub units: Vec<BlockGroupUnit>,
}

impl Default for SampleWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleWorld {
    /// Build the sample world.
    #[must_use]
    pub fn new() -> Self {
        let counties = [
            ("06001", "Alameda", -122.5, 37.0),
            ("06003", "Alpine", -120.0, 38.0),
            ("32031", "Washoe", -119.5, 39.0),
        ];
        let mut boundaries = vec![
            boundary("06", "California", square(-124.0, 32.0, 10.0)),
            boundary(
                "32",
                "Nevada",
                MultiPolygon::new(vec![
                    Rect::new(coord! { x: -120.0, y: 35.0 }, coord! { x: -114.0, y: 42.0 })
                        .to_polygon(),
                ]),
            ),
        ];
        let mut units = Vec::new();
        for (index, (county, name, lon, lat)) in counties.into_iter().enumerate() {
            boundaries.push(boundary(county, name, square(lon, lat, 1.0)));
            let base = 100 * (index as u64 + 1);
            units.push(unit(
                &format!("{county}0001001"),
                base,
                base * 3 / 4,
                MultiPolygon::new(vec![
                    Rect::new(coord! { x: lon, y: lat }, coord! { x: lon + 0.5, y: lat + 1.0 })
                        .to_polygon(),
                ]),
            ));
            units.push(unit(
                &format!("{county}0001002"),
                base + 50,
                base / 2,
                MultiPolygon::new(vec![
                    Rect::new(
                        coord! { x: lon + 0.5, y: lat },
                        coord! { x: lon + 1.0, y: lat + 1.0 },
                    )
                    .to_polygon(),
                ]),
            ));
        }
        Self { boundaries, units }
    }

    /// Load the world into `store` in one bulk session.
    pub fn load_into(&self, store: &SpatialStore) -> Result<(), StoreError> {
        store.load(LoadMode::Bulk, DEFAULT_BATCH_SIZE, |session| {
            for boundary in &self.boundaries {
                session.write_boundary(boundary)?;
            }
            for unit in &self.units {
                session.write_unit(unit)?;
            }
            Ok::<(), StoreError>(())
        })?;
        Ok(())
    }

    /// Open an in-memory store holding the sample world.
    pub fn store() -> Result<SpatialStore, StoreError> {
        let store = SpatialStore::open_in_memory()?;
        Self::new().load_into(&store)?;
        Ok(store)
    }
}
