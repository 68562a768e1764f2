//! GeoJSON rendering for boundary responses.

use gazetteer_core::{BoundaryFeature, Layer, Population};
use geo::{LineString, MultiPolygon};
use serde_json::{Map, Value, json};

/// Coordinates are written with six decimals, roughly 10 cm.
const COORD_SCALE: f64 = 1e6;

fn position(x: f64, y: f64) -> Value {
    json!([
        (x * COORD_SCALE).round() / COORD_SCALE,
        (y * COORD_SCALE).round() / COORD_SCALE
    ])
}

fn ring(line: &LineString<f64>) -> Value {
    Value::Array(line.coords().map(|c| position(c.x, c.y)).collect())
}

/// GeoJSON `MultiPolygon` geometry object.
#[must_use]
pub fn multi_polygon(geometry: &MultiPolygon<f64>) -> Value {
    let polygons: Vec<Value> = geometry
        .0
        .iter()
        .map(|polygon| {
            let mut rings = vec![ring(polygon.exterior())];
            rings.extend(polygon.interiors().iter().map(ring));
            Value::Array(rings)
        })
        .collect();
    json!({ "type": "MultiPolygon", "coordinates": polygons })
}

/// GeoJSON `Feature` with the given properties.
#[must_use]
pub fn feature(geometry: &MultiPolygon<f64>, properties: Map<String, Value>) -> Value {
    json!({
        "type": "Feature",
        "geometry": multi_polygon(geometry),
        "properties": properties,
    })
}

/// Properties shared by every boundary response: identifier, name and the
/// population joined from block groups.
#[must_use]
pub fn boundary_properties(boundary: &BoundaryFeature) -> Map<String, Value> {
    let population = boundary.population.unwrap_or_default();
    let mut properties = Map::new();
    properties.insert("geoid".to_owned(), json!(boundary.id));
    properties.insert("name".to_owned(), json!(boundary.name));
    insert_population(&mut properties, population);
    match boundary.id.layer() {
        Layer::State => {}
        Layer::County => {
            properties.insert("state".to_owned(), json!(boundary.id.state()));
        }
        Layer::BlockGroup => {
            properties.insert("tract".to_owned(), json!(boundary.id.tract()));
            properties.insert("county".to_owned(), json!(boundary.id.county()));
        }
    }
    properties
}

pub(crate) fn insert_population(properties: &mut Map<String, Value>, population: Population) {
    properties.insert("total".to_owned(), json!(population.total));
    properties.insert("adult".to_owned(), json!(population.adult));
}

/// GeoJSON `FeatureCollection` of boundaries.
#[must_use]
pub fn boundary_collection(boundaries: &[BoundaryFeature]) -> Value {
    let features: Vec<Value> = boundaries
        .iter()
        .map(|boundary| feature(&boundary.geometry, boundary_properties(boundary)))
        .collect();
    json!({ "type": "FeatureCollection", "features": features })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gazetteer_core::test_support::square;
    use rstest::rstest;

    fn county() -> BoundaryFeature {
        BoundaryFeature {
            row_id: 3,
            id: "06001".parse().expect("id"),
            name: "Alameda".to_owned(),
            geometry: square(-122.5, 37.0, 1.0),
            population: Some(Population::new(250, 125)),
        }
    }

    #[rstest]
    fn counties_carry_population_and_state() {
        let collection = boundary_collection(&[county()]);
        assert_eq!(collection["type"], "FeatureCollection");
        let properties = &collection["features"][0]["properties"];
        assert_eq!(properties["geoid"], "06001");
        assert_eq!(properties["state"], "06");
        assert_eq!(properties["total"], 250);
        assert_eq!(properties["adult"], 125);
    }

    #[rstest]
    fn rings_are_closed_and_rounded() {
        let geometry = multi_polygon(&square(-122.123_456_78, 37.0, 1.0));
        let exterior = geometry["coordinates"][0][0]
            .as_array()
            .expect("exterior ring");
        assert_eq!(exterior.first(), exterior.last());
        assert!(exterior.iter().any(|point| point[0] == -122.123_457));
    }

    #[rstest]
    fn block_groups_name_their_tract() {
        let mut unit = county();
        unit.id = "060010001001".parse().expect("id");
        let properties = boundary_properties(&unit);
        assert_eq!(properties["tract"], "06001000100");
        assert_eq!(properties["county"], "06001");
    }
}
