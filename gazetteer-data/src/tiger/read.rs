use std::path::Path;

use gazetteer_core::{Crs, GeoId, Layer, reproject};
use geo::{Contains, Coord, LineString, MultiPolygon, Point, Polygon};
use log::warn;
use shapefile::dbase::{FieldValue, Record};
use shapefile::{PolygonRing, Reader, Shape};

use super::ShapefileError;

/// One boundary feature read from a shapefile.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeRecord {
    /// Identifier from the `GEOID` attribute.
    pub id: GeoId,
    /// Display name from `NAME`, else `NAMELSAD`.
    pub name: Option<String>,
    /// Geometry in WGS84 longitude/latitude.
    pub geometry: MultiPolygon<f64>,
}

/// Counts from one pass over a shapefile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShapeStats {
    /// Records handed to the callback.
    pub read: u64,
    /// Records skipped for a bad identifier or non-polygon shape.
    pub skipped: u64,
}

/// Stream the features of `shp_path` into `visit`, in file order.
///
/// Records whose `GEOID` is missing or does not belong to `layer`, and
/// shapes that are not polygons, are logged and skipped. The first error
/// from `visit` stops the pass.
pub fn for_each_shape<F, E>(shp_path: &Path, layer: Layer, mut visit: F) -> Result<ShapeStats, E>
where
    F: FnMut(ShapeRecord) -> Result<(), E>,
    E: From<ShapefileError>,
{
    let read_error = |source| ShapefileError::Read {
        path: shp_path.to_path_buf(),
        source,
    };
    let mut reader = Reader::from_path(shp_path).map_err(read_error)?;
    let mut stats = ShapeStats::default();
    for item in reader.iter_shapes_and_records() {
        let (shape, record) = item.map_err(read_error)?;
        let Some(raw_id) = text_field(&record, "GEOID") else {
            warn!("skipping {layer} record without GEOID in {}", shp_path.display());
            stats.skipped += 1;
            continue;
        };
        let id = match GeoId::for_layer(raw_id, layer) {
            Ok(id) => id,
            Err(err) => {
                warn!("skipping {layer} record in {}: {err}", shp_path.display());
                stats.skipped += 1;
                continue;
            }
        };
        let Some(native) = polygon_geometry(&shape) else {
            warn!("skipping {id}: {:?} shape is not a polygon", shape.shapetype());
            stats.skipped += 1;
            continue;
        };
        let name = text_field(&record, "NAME").or_else(|| text_field(&record, "NAMELSAD"));
        let geometry = reproject(&native, Crs::Nad83, Crs::Wgs84);
        visit(ShapeRecord { id, name, geometry })?;
        stats.read += 1;
    }
    Ok(stats)
}

fn text_field(record: &Record, name: &str) -> Option<String> {
    match record.get(name) {
        Some(FieldValue::Character(Some(value))) => {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_owned())
        }
        _ => None,
    }
}

fn polygon_geometry(shape: &Shape) -> Option<MultiPolygon<f64>> {
    let geometry = match shape {
        Shape::Polygon(polygon) => assemble(polygon.rings(), |p| Coord { x: p.x, y: p.y }),
        Shape::PolygonM(polygon) => assemble(polygon.rings(), |p| Coord { x: p.x, y: p.y }),
        Shape::PolygonZ(polygon) => assemble(polygon.rings(), |p| Coord { x: p.x, y: p.y }),
        _ => return None,
    };
    (!geometry.0.is_empty()).then_some(geometry)
}

/// Group shapefile rings into polygons: each outer ring starts a polygon
/// and each inner ring joins the first outer ring that contains it, or the
/// most recent outer ring when none does. A ring set with no outer ring at
/// all is read as a set of shells.
fn assemble<P>(rings: &[PolygonRing<P>], coord: impl Fn(&P) -> Coord<f64>) -> MultiPolygon<f64> {
    let mut polygons: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();
    let mut orphans = Vec::new();
    for ring in rings {
        match ring {
            PolygonRing::Outer(points) => {
                let exterior: LineString<f64> = points.iter().map(&coord).collect();
                if exterior.0.len() >= 4 {
                    polygons.push((exterior, Vec::new()));
                }
            }
            PolygonRing::Inner(points) => {
                let interior: LineString<f64> = points.iter().map(&coord).collect();
                if interior.0.len() >= 4 {
                    orphans.push(interior);
                }
            }
        }
    }
    if polygons.is_empty() {
        // Rings wound the wrong way read back as holes; treat them as shells.
        return MultiPolygon::new(
            orphans
                .into_iter()
                .map(|exterior| Polygon::new(exterior, Vec::new()))
                .collect(),
        );
    }
    for interior in orphans {
        let probe = interior.0.first().copied().map(Point::from);
        let owner = probe.and_then(|probe| {
            polygons.iter().position(|(exterior, _)| {
                Polygon::new(exterior.clone(), Vec::new()).contains(&probe)
            })
        });
        let slot = owner.or_else(|| polygons.len().checked_sub(1));
        if let Some((_, holes)) = slot.and_then(|index| polygons.get_mut(index)) {
            holes.push(interior);
        }
    }
    MultiPolygon::new(
        polygons
            .into_iter()
            .map(|(exterior, holes)| Polygon::new(exterior, holes))
            .collect(),
    )
}
