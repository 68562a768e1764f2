//! Builders for zipped shapefile fixtures.
//!
//! Helpers panic on failure; they exist for tests only.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use geo::{LineString, MultiPolygon, Winding};
use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use shapefile::{Point, Polygon, PolygonRing, Writer};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// One feature to write into a fixture archive.
#[derive(Debug, Clone)]
pub struct FixtureFeature {
    /// Value of the `GEOID` attribute.
    pub geoid: String,
    /// Value of the `NAME` attribute.
    pub name: String,
    /// Geometry in longitude/latitude.
    pub geometry: MultiPolygon<f64>,
}

impl FixtureFeature {
    /// Construct a fixture feature.
    pub fn new(geoid: impl Into<String>, name: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        Self {
            geoid: geoid.into(),
            name: name.into(),
            geometry,
        }
    }
}

/// Write `features` as a zipped shapefile at `archive`, with members named
/// after `stem`.
///
/// # Panics
///
/// Panics when any file cannot be written.
pub fn write_shapefile_archive(archive: &Path, stem: &str, features: &[FixtureFeature]) {
    let scratch = tempfile::tempdir().expect("scratch directory");
    let shp = scratch.path().join(format!("{stem}.shp"));
    let table = TableWriterBuilder::new()
        .add_character_field(FieldName::try_from("GEOID").expect("field name"), 20)
        .add_character_field(FieldName::try_from("NAME").expect("field name"), 100);
    let mut writer = Writer::from_path(&shp, table).expect("shapefile writer");
    for feature in features {
        let mut record = Record::default();
        record.insert(
            "GEOID".to_owned(),
            FieldValue::Character(Some(feature.geoid.clone())),
        );
        record.insert(
            "NAME".to_owned(),
            FieldValue::Character(Some(feature.name.clone())),
        );
        writer
            .write_shape_and_record(&to_shapefile_polygon(&feature.geometry), &record)
            .expect("write shape");
    }
    drop(writer);

    let file = File::create(archive).expect("archive file");
    let mut zip = ZipWriter::new(file);
    for extension in ["shp", "shx", "dbf"] {
        let member = scratch.path().join(format!("{stem}.{extension}"));
        let bytes = std::fs::read(&member).expect("read member");
        zip.start_file(format!("{stem}.{extension}"), SimpleFileOptions::default())
            .expect("start member");
        zip.write_all(&bytes).expect("write member");
    }
    zip.finish().expect("finish archive");
}

/// Write bytes that are not a zip archive, for failure paths.
///
/// # Panics
///
/// Panics when the file cannot be written.
pub fn write_garbage(path: &Path) {
    let mut file = File::create(path).expect("garbage file");
    file.write_all(b"<html>please wait</html>").expect("write garbage");
}

fn to_shapefile_polygon(geometry: &MultiPolygon<f64>) -> Polygon {
    let mut rings = Vec::new();
    for polygon in geometry {
        let mut exterior = polygon.exterior().clone();
        exterior.make_cw_winding();
        rings.push(PolygonRing::Outer(points(&exterior)));
        for interior in polygon.interiors() {
            let mut interior = interior.clone();
            interior.make_ccw_winding();
            rings.push(PolygonRing::Inner(points(&interior)));
        }
    }
    Polygon::with_rings(rings)
}

fn points(ring: &LineString<f64>) -> Vec<Point> {
    ring.coords().map(|c| Point::new(c.x, c.y)).collect()
}
