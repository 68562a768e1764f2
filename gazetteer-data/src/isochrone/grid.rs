//! Sampling grids over a region.

use std::collections::HashSet;

use gazetteer_core::{Crs, RoundedOrigin, reproject};
use geo::{BoundingRect, Contains, Coord, InteriorPoint, MultiPolygon, Point};

/// Centres of the `spacing_m` square cells that fall inside `region`.
///
/// The grid is laid in CONUS Albers metres over the region's bounding box.
/// Centres are returned as rounded longitude/latitude origins, deduplicated
/// in row-major order. A region too small to contain any centre yields its
/// interior point so every region gets at least one origin.
#[must_use]
pub fn grid_points(region: &MultiPolygon<f64>, spacing_m: f64) -> Vec<RoundedOrigin> {
    if !(spacing_m.is_finite() && spacing_m > 0.0) {
        return Vec::new();
    }
    let projected = reproject(region, Crs::Wgs84, Crs::ConusAlbers);
    let Some(bounds) = projected.bounding_rect() else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut points = Vec::new();
    let mut y = bounds.min().y + spacing_m / 2.0;
    while y < bounds.max().y {
        let mut x = bounds.min().x + spacing_m / 2.0;
        while x < bounds.max().x {
            let centre = Point::new(x, y);
            if projected.contains(&centre) {
                let lonlat = Crs::ConusAlbers.transform(Crs::Wgs84, Coord { x, y });
                let origin = RoundedOrigin::from_lonlat(lonlat);
                if seen.insert(origin) {
                    points.push(origin);
                }
            }
            x += spacing_m;
        }
        y += spacing_m;
    }

    if points.is_empty()
        && let Some(inside) = region.interior_point()
    {
        points.push(RoundedOrigin::from_lonlat(inside.0));
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use gazetteer_core::test_support::square;
    use rstest::rstest;

    #[rstest]
    fn points_lie_inside_region() {
        let region = square(-120.0, 38.0, 0.5);
        let points = grid_points(&region, 10_000.0);
        assert!(!points.is_empty());
        for origin in &points {
            let coord = origin.to_lonlat();
            assert!(region.contains(&Point::from(coord)), "{coord:?} outside region");
        }
    }

    #[rstest]
    fn finer_spacing_yields_more_points() {
        let region = square(-120.0, 38.0, 0.5);
        let coarse = grid_points(&region, 20_000.0).len();
        let fine = grid_points(&region, 5_000.0).len();
        assert!(fine > coarse * 4, "{fine} vs {coarse}");
    }

    #[rstest]
    fn tiny_region_falls_back_to_interior_point() {
        let region = square(-120.0, 38.0, 0.001);
        let points = grid_points(&region, 50_000.0);
        assert_eq!(points.len(), 1);
    }

    #[rstest]
    #[case(0.0)]
    #[case(-5.0)]
    #[case(f64::NAN)]
    fn invalid_spacing_yields_nothing(#[case] spacing: f64) {
        assert!(grid_points(&square(-120.0, 38.0, 0.5), spacing).is_empty());
    }

    #[rstest]
    fn origins_are_unique() {
        let points = grid_points(&square(-120.0, 38.0, 0.2), 1_000.0);
        let unique: HashSet<_> = points.iter().collect();
        assert_eq!(unique.len(), points.len());
    }
}
