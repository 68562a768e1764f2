//! Coordinate reference systems used across the pipeline.
//!
//! Source archives arrive in NAD83 geographic coordinates, the store keeps
//! WGS84 longitude/latitude, tiles are cut in spherical Web Mercator and every
//! distance-based computation (simplification tolerances, grid sampling,
//! buffers) runs in CONUS Albers equal-area metres.
//!
//! NAD83 and WGS84 differ by roughly a metre across the conterminous United
//! States, well under any simplification tier, so the datum shift is the
//! identity here.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use geo::{Coord, MapCoords};
use serde::{Deserialize, Serialize};

/// Semi-major axis shared by GRS80 and the Web Mercator sphere.
const EARTH_RADIUS_M: f64 = 6_378_137.0;
/// GRS80 first eccentricity squared.
const GRS80_E2: f64 = 0.006_694_380_022_90;

/// Reference systems the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Crs {
    /// NAD83 geographic (EPSG:4269), as shipped in boundary archives.
    Nad83,
    /// WGS84 geographic (EPSG:4326), the store's canonical CRS.
    Wgs84,
    /// Spherical Web Mercator (EPSG:3857), the tiling CRS.
    WebMercator,
    /// CONUS Albers equal-area conic on NAD83 (EPSG:5070), metres.
    ConusAlbers,
}

impl Crs {
    /// EPSG code for the reference system.
    #[must_use]
    pub const fn epsg(self) -> u32 {
        match self {
            Self::Nad83 => 4269,
            Self::Wgs84 => 4326,
            Self::WebMercator => 3857,
            Self::ConusAlbers => 5070,
        }
    }

    const fn is_geographic(self) -> bool {
        matches!(self, Self::Nad83 | Self::Wgs84)
    }

    /// Transform a single coordinate from `self` into `target`.
    #[must_use]
    pub fn transform(self, target: Self, coord: Coord<f64>) -> Coord<f64> {
        if self == target || (self.is_geographic() && target.is_geographic()) {
            return coord;
        }
        let lonlat = match self {
            Self::Nad83 | Self::Wgs84 => coord,
            Self::WebMercator => mercator_inverse(coord),
            Self::ConusAlbers => ALBERS.inverse(coord),
        };
        match target {
            Self::Nad83 | Self::Wgs84 => lonlat,
            Self::WebMercator => mercator_forward(lonlat),
            Self::ConusAlbers => ALBERS.forward(lonlat),
        }
    }
}

/// Reproject any `geo` geometry between reference systems.
///
/// # Examples
///
/// ```
/// use gazetteer_core::{Crs, reproject};
/// use geo::Point;
///
/// let origin = Point::new(-96.0, 23.0);
/// let projected = reproject(&origin, Crs::Wgs84, Crs::ConusAlbers);
/// assert!(projected.x().abs() < 1e-6);
/// assert!(projected.y().abs() < 1e-6);
/// ```
pub fn reproject<G>(geometry: &G, from: Crs, to: Crs) -> G::Output
where
    G: MapCoords<f64, f64>,
{
    geometry.map_coords(|coord| from.transform(to, coord))
}

fn mercator_forward(coord: Coord<f64>) -> Coord<f64> {
    // Clamp to the square world extent; the poles are unrepresentable.
    let lat = coord.y.clamp(-85.051_128_78, 85.051_128_78).to_radians();
    Coord {
        x: EARTH_RADIUS_M * coord.x.to_radians(),
        y: EARTH_RADIUS_M * (FRAC_PI_4 + lat / 2.0).tan().ln(),
    }
}

fn mercator_inverse(coord: Coord<f64>) -> Coord<f64> {
    Coord {
        x: (coord.x / EARTH_RADIUS_M).to_degrees(),
        y: (2.0 * (coord.y / EARTH_RADIUS_M).exp().atan() - FRAC_PI_2).to_degrees(),
    }
}

/// Ellipsoidal Albers equal-area conic parameters (Snyder, ch. 14).
struct Albers {
    lon0: f64,
    n: f64,
    c: f64,
    rho0: f64,
}

/// EPSG:5070: standard parallels 29.5°N and 45.5°N, origin 23°N 96°W.
const ALBERS: Albers = Albers::conus();

impl Albers {
    const fn conus() -> Self {
        // Derived from the standard parallels with `Albers::derive`; kept as
        // literals so the projection can live in a constant.
        Self {
            lon0: -96.0,
            n: 0.602_902_769_065_759,
            c: 1.349_182_031_560_969_3,
            rho0: 9_928_937.004_248_794,
        }
    }

    #[cfg(test)]
    fn derive(lat0: f64, lat1: f64, lat2: f64, lon0: f64) -> Self {
        let (lat0, lat1, lat2) = (lat0.to_radians(), lat1.to_radians(), lat2.to_radians());
        let m1 = m(lat1);
        let m2 = m(lat2);
        let q0 = q(lat0);
        let q1 = q(lat1);
        let q2 = q(lat2);
        let n = (m1 * m1 - m2 * m2) / (q2 - q1);
        let c = m1 * m1 + n * q1;
        let rho0 = EARTH_RADIUS_M * (c - n * q0).sqrt() / n;
        Self { lon0, n, c, rho0 }
    }

    fn forward(&self, coord: Coord<f64>) -> Coord<f64> {
        let lat = coord.y.to_radians();
        let rho = EARTH_RADIUS_M * (self.c - self.n * q(lat)).max(0.0).sqrt() / self.n;
        let theta = self.n * (coord.x - self.lon0).to_radians();
        Coord {
            x: rho * theta.sin(),
            y: self.rho0 - rho * theta.cos(),
        }
    }

    fn inverse(&self, coord: Coord<f64>) -> Coord<f64> {
        let dy = self.rho0 - coord.y;
        let rho = coord.x.hypot(dy);
        let theta = coord.x.atan2(dy);
        let scaled = rho * self.n / EARTH_RADIUS_M;
        let q_target = (self.c - scaled * scaled) / self.n;
        Coord {
            x: self.lon0 + (theta / self.n).to_degrees(),
            y: latitude_from_q(q_target).to_degrees(),
        }
    }
}

fn m(lat: f64) -> f64 {
    let sin = lat.sin();
    lat.cos() / (1.0 - GRS80_E2 * sin * sin).sqrt()
}

fn q(lat: f64) -> f64 {
    let e = GRS80_E2.sqrt();
    let sin = lat.sin();
    let es = e * sin;
    (1.0 - GRS80_E2) * (sin / (1.0 - es * es) - ((1.0 - es) / (1.0 + es)).ln() / (2.0 * e))
}

fn latitude_from_q(q_target: f64) -> f64 {
    let e = GRS80_E2.sqrt();
    let mut lat = (q_target / 2.0).clamp(-1.0, 1.0).asin();
    for _ in 0..15 {
        let sin = lat.sin();
        let es = e * sin;
        let one_minus = 1.0 - es * es;
        let delta = one_minus * one_minus / (2.0 * lat.cos())
            * (q_target / (1.0 - GRS80_E2) - sin / one_minus
                + ((1.0 - es) / (1.0 + es)).ln() / (2.0 * e));
        lat += delta;
        if delta.abs() < 1e-12 {
            break;
        }
    }
    lat
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Point;
    use proptest::prelude::*;
    use rstest::rstest;

    fn close(a: f64, b: f64, tolerance: f64) -> bool {
        (a - b).abs() <= tolerance
    }

    #[rstest]
    fn albers_constants_match_standard_parallels() {
        let derived = Albers::derive(23.0, 29.5, 45.5, -96.0);
        assert!(close(derived.n, ALBERS.n, 1e-9));
        assert!(close(derived.c, ALBERS.c, 1e-9));
        assert!(close(derived.rho0, ALBERS.rho0, 1e-3));
    }

    #[rstest]
    fn albers_projects_origin_and_eastern_point() {
        let origin = Crs::Wgs84.transform(Crs::ConusAlbers, Coord { x: -96.0, y: 23.0 });
        assert!(close(origin.x, 0.0, 1e-6) && close(origin.y, 0.0, 1e-6));
        let projected = Crs::Wgs84.transform(Crs::ConusAlbers, Coord { x: -75.0, y: 35.0 });
        assert!(close(projected.x, 1_885_428.4, 1.0), "x = {}", projected.x);
        assert!(close(projected.y, 1_535_969.3, 1.0), "y = {}", projected.y);
    }

    #[rstest]
    fn mercator_matches_known_extent() {
        let corner = Crs::Wgs84.transform(Crs::WebMercator, Coord { x: 180.0, y: 0.0 });
        assert!(close(corner.x, 20_037_508.342_789_244, 1e-6));
        assert!(close(corner.y, 0.0, 1e-6));
    }

    #[rstest]
    fn geographic_datums_are_interchangeable() {
        let point = Point::new(-122.27, 37.8);
        assert_eq!(reproject(&point, Crs::Nad83, Crs::Wgs84), point);
    }

    proptest! {
        #[test]
        fn albers_inverse_recovers_conus_coordinates(lon in -125.0f64..-66.0, lat in 24.0f64..50.0) {
            let there = Crs::Wgs84.transform(Crs::ConusAlbers, Coord { x: lon, y: lat });
            let back = Crs::ConusAlbers.transform(Crs::Wgs84, there);
            prop_assert!(close(back.x, lon, 1e-7));
            prop_assert!(close(back.y, lat, 1e-7));
        }

        #[test]
        fn mercator_inverse_recovers_coordinates(lon in -180.0f64..180.0, lat in -80.0f64..80.0) {
            let there = Crs::Wgs84.transform(Crs::WebMercator, Coord { x: lon, y: lat });
            let back = Crs::WebMercator.transform(Crs::Wgs84, there);
            prop_assert!(close(back.x, lon, 1e-9));
            prop_assert!(close(back.y, lat, 1e-9));
        }
    }
}
