//! Cut boundary layers into a vector tile.

use gazetteer_core::{BoundaryFeature, Crs, Layer, SpatialStore, TileCoord, ToleranceTier};
use geo::{LineString, MultiPolygon};
use log::debug;
use mvt::{GeomEncoder, GeomType, Tile};

use super::clip::{Ring, clean_ring, clip_ring, enforce_winding};
use super::{TileError, TileServiceConfig};

/// One sub-layer of a rendered tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LayerPlan {
    pub(crate) name: &'static str,
    pub(crate) layer: Layer,
    pub(crate) tier: ToleranceTier,
}

/// Sub-layers drawn at the tile's zoom: states always, counties from
/// `county_min_zoom` with a tier that tightens as the zoom grows.
pub(crate) fn layer_plan(coord: TileCoord, config: &TileServiceConfig) -> Vec<LayerPlan> {
    let mut plan = vec![LayerPlan {
        name: "states",
        layer: Layer::State,
        tier: ToleranceTier::Coarse,
    }];
    if coord.z() >= config.county_min_zoom {
        plan.push(LayerPlan {
            name: "counties",
            layer: Layer::County,
            tier: ToleranceTier::for_zoom(coord.z()),
        });
    }
    plan
}

/// Render `coord`, or `None` when no feature reaches the tile.
pub(crate) fn render_tile(
    store: &SpatialStore,
    coord: TileCoord,
    config: &TileServiceConfig,
) -> Result<Option<Vec<u8>>, TileError> {
    let extent = f64::from(config.extent);
    let buffer = f64::from(config.buffer);
    let envelope = coord.buffered_mercator_envelope(buffer / extent);
    let bounds = TileCoord::store_bounds(envelope);

    let mut tile = Tile::new(config.extent);
    let mut drawn = 0_usize;
    for plan in layer_plan(coord, config) {
        let features = store.boundaries_in_bbox(plan.layer, bounds, Some(plan.tier))?;
        let mut layer = tile.create_layer(plan.name);
        let mut written = 0_usize;
        for feature in &features {
            let rings = tile_polygons(coord, config, &feature.geometry);
            if rings.is_empty() {
                continue;
            }
            let geometry = encode_polygons(&rings).map_err(|source| TileError::Encode {
                coord,
                layer: plan.name,
                source,
            })?;
            let mut encoded = layer.into_feature(geometry);
            encoded.set_id(u64::try_from(feature.row_id).unwrap_or_default());
            add_tags(&mut encoded, plan.layer, feature);
            layer = encoded.into_layer();
            written += 1;
        }
        if written > 0 {
            tile.add_layer(layer).map_err(|source| TileError::Encode {
                coord,
                layer: plan.name,
                source,
            })?;
            drawn += written;
        }
        debug!("tile {coord}: {written} of {} {} drawn", features.len(), plan.name);
    }
    if drawn == 0 {
        return Ok(None);
    }
    tile.to_bytes()
        .map(Some)
        .map_err(|source| TileError::Encode {
            coord,
            layer: "tile",
            source,
        })
}

fn add_tags(feature: &mut mvt::Feature, layer: Layer, boundary: &BoundaryFeature) {
    feature.add_tag_string("geoid", boundary.id.as_str());
    feature.add_tag_string("name", &boundary.name);
    if layer == Layer::County {
        feature.add_tag_string("state", boundary.id.state().as_str());
    }
}

/// Exterior ring followed by its holes, in tile pixels.
type TilePolygon = Vec<Ring>;

fn tile_polygons(
    coord: TileCoord,
    config: &TileServiceConfig,
    geometry: &MultiPolygon<f64>,
) -> Vec<TilePolygon> {
    let extent = f64::from(config.extent);
    let buffer = f64::from(config.buffer);
    let to_pixels = |ring: &LineString<f64>| -> Ring {
        let open = ring.0.len().saturating_sub(usize::from(ring.is_closed()));
        let pixels: Ring = ring
            .0
            .iter()
            .take(open)
            .filter(|c| c.x.is_finite() && c.y.is_finite())
            .map(|&c| {
                let mercator = Crs::Wgs84.transform(Crs::WebMercator, c);
                let pixel = coord.to_tile_space(mercator, config.extent);
                (pixel.x, pixel.y)
            })
            .collect();
        clean_ring(&clip_ring(&pixels, extent, buffer))
    };

    geometry
        .0
        .iter()
        .filter_map(|polygon| {
            let exterior = to_pixels(polygon.exterior());
            if exterior.is_empty() {
                return None;
            }
            let mut rings = vec![enforce_winding(exterior, true)];
            rings.extend(
                polygon
                    .interiors()
                    .iter()
                    .map(to_pixels)
                    .filter(|hole| !hole.is_empty())
                    .map(|hole| enforce_winding(hole, false)),
            );
            Some(rings)
        })
        .collect()
}

fn encode_polygons(polygons: &[TilePolygon]) -> Result<mvt::GeomData, mvt::Error> {
    let mut encoder = GeomEncoder::new(GeomType::Polygon);
    for ring in polygons.iter().flatten() {
        for &(x, y) in ring {
            encoder = encoder.point(x, y)?;
        }
        encoder = encoder.complete()?;
    }
    encoder.encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gazetteer_core::test_support::{SampleWorld, boundary};
    use gazetteer_core::{DEFAULT_BATCH_SIZE, LoadMode, StoreError};
    use gazetteer_data::simplify::ensure_simplified;
    use geo::{Coord, Polygon};
    use rstest::rstest;

    fn coord(z: u8, x: u32, y: u32) -> TileCoord {
        TileCoord::new(z, x, y).expect("tile")
    }

    #[rstest]
    #[case(4, &["states"])]
    #[case(5, &["states"])]
    #[case(6, &["states", "counties"])]
    #[case(12, &["states", "counties"])]
    fn counties_join_at_the_threshold(#[case] z: u8, #[case] expected: &[&str]) {
        let names: Vec<&str> = layer_plan(coord(z, 0, 0), &TileServiceConfig::default())
            .iter()
            .map(|plan| plan.name)
            .collect();
        assert_eq!(names, expected);
    }

    #[rstest]
    fn county_tiers_coarsen_when_zoomed_out() {
        let config = TileServiceConfig::default();
        let tier_at = |z: u8| {
            layer_plan(coord(z, 0, 0), &config)
                .into_iter()
                .find(|plan| plan.layer == Layer::County)
                .map(|plan| plan.tier)
                .expect("county layer")
        };
        assert_eq!(tier_at(6), ToleranceTier::Coarse);
        assert!(tier_at(6).metres() > tier_at(8).metres());
        assert!(tier_at(8).metres() > tier_at(12).metres());
    }

    /// Square county whose edges zig-zag by a few hundred metres.
    fn jagged_county() -> MultiPolygon<f64> {
        let (west, south, size, steps) = (-120.0, 38.0, 0.4, 40_u32);
        let step = size / f64::from(steps);
        let wobble = |i: u32| if i % 2 == 0 { 0.003 } else { -0.003 };
        let mut ring: Vec<Coord<f64>> = Vec::new();
        for i in 0..steps {
            let t = f64::from(i) * step;
            ring.push(Coord { x: west + t, y: south + wobble(i) });
        }
        for i in 0..steps {
            let t = f64::from(i) * step;
            ring.push(Coord { x: west + size + wobble(i), y: south + t });
        }
        for i in 0..steps {
            let t = f64::from(i) * step;
            ring.push(Coord { x: west + size - t, y: south + size + wobble(i) });
        }
        for i in 0..steps {
            let t = f64::from(i) * step;
            ring.push(Coord { x: west + wobble(i), y: south + size - t });
        }
        ring.push(ring[0]);
        MultiPolygon::new(vec![Polygon::new(LineString::from(ring), Vec::new())])
    }

    fn county_vertices(store: &SpatialStore, tile: TileCoord, config: &TileServiceConfig) -> usize {
        let plan = layer_plan(tile, config)
            .into_iter()
            .find(|plan| plan.layer == Layer::County)
            .expect("county layer");
        let envelope =
            tile.buffered_mercator_envelope(f64::from(config.buffer) / f64::from(config.extent));
        let bounds = TileCoord::store_bounds(envelope);
        store
            .boundaries_in_bbox(Layer::County, bounds, Some(plan.tier))
            .expect("query")
            .iter()
            .flat_map(|feature| tile_polygons(tile, config, &feature.geometry))
            .flatten()
            .map(|ring| ring.len())
            .sum()
    }

    #[rstest]
    fn zoomed_out_counties_carry_fewer_vertices() {
        let store = SpatialStore::open_in_memory().expect("store");
        store
            .load(LoadMode::Bulk, DEFAULT_BATCH_SIZE, |session| {
                session.write_boundary(&boundary("06003", "Alpine", jagged_county()))?;
                Ok::<(), StoreError>(())
            })
            .expect("load");
        for tier in [ToleranceTier::Coarse, ToleranceTier::Medium] {
            ensure_simplified(&store, Layer::County, tier, DEFAULT_BATCH_SIZE).expect("simplify");
        }
        let config = TileServiceConfig::default();

        let zoomed_out = county_vertices(&store, coord(6, 10, 24), &config);
        let zoomed_in = county_vertices(&store, coord(8, 42, 98), &config);
        assert!(zoomed_out > 0);
        assert!(
            zoomed_out < zoomed_in,
            "z6 drew {zoomed_out} vertices, z8 drew {zoomed_in}"
        );

        let payload = render_tile(&store, coord(6, 10, 24), &config)
            .expect("render")
            .expect("county reaches the tile");
        let reader = mvt_reader::Reader::new(payload).expect("decodable tile");
        assert_eq!(
            reader.get_layer_names().expect("layer names"),
            vec!["counties".to_owned()]
        );
    }

    #[rstest]
    fn empty_ocean_tiles_render_nothing() {
        let store = SampleWorld::store().expect("store");
        let ocean = coord(6, 0, 40);
        let rendered =
            render_tile(&store, ocean, &TileServiceConfig::default()).expect("render");
        assert_eq!(rendered, None);
    }

    #[rstest]
    fn rendering_is_deterministic() {
        let store = SampleWorld::store().expect("store");
        let config = TileServiceConfig::default();
        let tile = coord(6, 10, 24);
        let first = render_tile(&store, tile, &config).expect("render");
        let second = render_tile(&store, tile, &config).expect("render");
        assert!(first.is_some());
        assert_eq!(first, second);
    }
}
