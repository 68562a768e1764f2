//! Read paths over boundaries and block groups.

use std::collections::HashMap;

use geo::{Point, Rect};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::codec::decode_geometry;
use super::{SpatialStore, StoreError, count};
use crate::boundary::{BoundaryFeature, Population, UnitRecord};
use crate::geoid::{GeoId, Layer};
use crate::tolerance::ToleranceTier;

/// Raw boundary row before geometry decoding.
struct BoundaryRow {
    row_id: i64,
    geoid: String,
    name: String,
    geom: Vec<u8>,
}

impl BoundaryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            row_id: row.get(0)?,
            geoid: row.get(1)?,
            name: row.get(2)?,
            geom: row.get(3)?,
        })
    }

    fn into_feature(self) -> Result<BoundaryFeature, StoreError> {
        let id = parse_id(self.geoid)?;
        let geometry = decode_geometry(&self.geom).map_err(|source| StoreError::Geometry {
            feature: id.to_string(),
            source,
        })?;
        Ok(BoundaryFeature {
            row_id: self.row_id,
            id,
            name: self.name,
            geometry,
            population: None,
        })
    }
}

fn parse_id(value: String) -> Result<GeoId, StoreError> {
    GeoId::new(value.clone()).map_err(|source| StoreError::Identifier { value, source })
}

fn tier_key(tier: Option<ToleranceTier>) -> Option<&'static str> {
    tier.map(ToleranceTier::as_str)
}

/// Unit name derived from the block-group digit, matching the census label.
fn unit_name(id: &GeoId) -> String {
    let digit = id.as_str().chars().last().unwrap_or('0');
    format!("Block Group {digit}")
}

impl SpatialStore {
    /// Number of rows stored for `layer`.
    pub fn layer_count(&self, layer: Layer) -> Result<u64, StoreError> {
        let connection = self.lock()?;
        let value: i64 = match layer {
            Layer::State | Layer::County => connection.query_row(
                "SELECT COUNT(*) FROM boundaries WHERE layer = ?1",
                [layer.as_str()],
                |row| row.get(0),
            ),
            Layer::BlockGroup => {
                connection.query_row("SELECT COUNT(*) FROM block_groups", [], |row| row.get(0))
            }
        }
        .map_err(StoreError::query("count layer rows"))?;
        Ok(count(value))
    }

    /// Number of block groups loaded for one state.
    pub fn block_group_count_in_state(&self, state: &GeoId) -> Result<u64, StoreError> {
        let connection = self.lock()?;
        let value: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM block_groups WHERE state_geoid = ?1",
                [state.as_str()],
                |row| row.get(0),
            )
            .map_err(StoreError::query("count block groups in state"))?;
        Ok(count(value))
    }

    /// Identifiers of every loaded state, ascending.
    pub fn state_ids(&self) -> Result<Vec<GeoId>, StoreError> {
        let connection = self.lock()?;
        let raw: Vec<String> = connection
            .prepare_cached("SELECT geoid FROM boundaries WHERE layer = 'state' ORDER BY geoid")
            .and_then(|mut stmt| {
                stmt.query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()
            })
            .map_err(StoreError::query("list states"))?;
        raw.into_iter().map(parse_id).collect()
    }

    /// One state or county with its aggregated population.
    ///
    /// `tier` selects a simplified variant; the authoritative geometry is used
    /// when the variant is absent.
    pub fn boundary(
        &self,
        id: &GeoId,
        tier: Option<ToleranceTier>,
    ) -> Result<Option<BoundaryFeature>, StoreError> {
        let row = {
            let connection = self.lock()?;
            connection
                .prepare_cached(
                    "SELECT b.id, b.geoid, b.name, COALESCE(s.geom, b.geom)
                     FROM boundaries b
                     LEFT JOIN simplified_geometries s
                        ON s.layer = b.layer AND s.feature_id = b.id AND s.tier = ?3
                     WHERE b.layer = ?1 AND b.geoid = ?2",
                )
                .and_then(|mut stmt| {
                    stmt.query_row(
                        params![id.layer().as_str(), id.as_str(), tier_key(tier)],
                        BoundaryRow::from_row,
                    )
                    .optional()
                })
                .map_err(StoreError::query("read boundary"))?
        };
        let Some(row) = row else {
            return Ok(None);
        };
        let mut feature = row.into_feature()?;
        feature.population = Some(self.population_within(id)?);
        Ok(Some(feature))
    }

    /// Boundaries of `layer` under `parent` (all of them when `parent` is
    /// `None`), each with its aggregated population.
    ///
    /// Block groups are not boundaries; use [`SpatialStore::units_in_county`].
    pub fn boundaries_by_parent(
        &self,
        layer: Layer,
        parent: Option<&GeoId>,
        tier: Option<ToleranceTier>,
    ) -> Result<Vec<BoundaryFeature>, StoreError> {
        if layer == Layer::BlockGroup {
            return Ok(Vec::new());
        }
        let rows = {
            let connection = self.lock()?;
            connection
                .prepare_cached(
                    "SELECT b.id, b.geoid, b.name, COALESCE(s.geom, b.geom)
                     FROM boundaries b
                     LEFT JOIN simplified_geometries s
                        ON s.layer = b.layer AND s.feature_id = b.id AND s.tier = ?3
                     WHERE b.layer = ?1 AND (?2 IS NULL OR b.parent_geoid = ?2)
                     ORDER BY b.geoid",
                )
                .and_then(|mut stmt| {
                    stmt.query_map(
                        params![layer.as_str(), parent.map(GeoId::as_str), tier_key(tier)],
                        BoundaryRow::from_row,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()
                })
                .map_err(StoreError::query("list boundaries"))?
        };
        let populations = self.population_by_prefix(layer)?;
        rows.into_iter()
            .map(|row| {
                let mut feature = row.into_feature()?;
                feature.population = Some(
                    populations
                        .get(&feature.id)
                        .copied()
                        .unwrap_or_default(),
                );
                Ok(feature)
            })
            .collect()
    }

    /// Boundaries of `layer` whose bounding boxes intersect `bounds`, ordered
    /// by identifier.
    pub fn boundaries_in_bbox(
        &self,
        layer: Layer,
        bounds: Rect<f64>,
        tier: Option<ToleranceTier>,
    ) -> Result<Vec<BoundaryFeature>, StoreError> {
        if layer == Layer::BlockGroup {
            return Ok(Vec::new());
        }
        let rows = {
            let connection = self.lock()?;
            connection
                .prepare_cached(
                    "SELECT b.id, b.geoid, b.name, COALESCE(s.geom, b.geom)
                     FROM boundary_rtree r
                     JOIN boundaries b ON b.id = r.id
                     LEFT JOIN simplified_geometries s
                        ON s.layer = b.layer AND s.feature_id = b.id AND s.tier = ?6
                     WHERE b.layer = ?1
                       AND r.max_x >= ?2 AND r.min_x <= ?3
                       AND r.max_y >= ?4 AND r.min_y <= ?5
                     ORDER BY b.geoid",
                )
                .and_then(|mut stmt| {
                    stmt.query_map(
                        params![
                            layer.as_str(),
                            bounds.min().x,
                            bounds.max().x,
                            bounds.min().y,
                            bounds.max().y,
                            tier_key(tier)
                        ],
                        BoundaryRow::from_row,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()
                })
                .map_err(StoreError::query("select boundaries in bbox"))?
        };
        rows.into_iter().map(BoundaryRow::into_feature).collect()
    }

    /// Look a boundary up by case-insensitive name, optionally within a
    /// parent. A trailing " County" in `name` is ignored.
    pub fn find_boundary_by_name(
        &self,
        layer: Layer,
        parent: Option<&GeoId>,
        name: &str,
    ) -> Result<Option<BoundaryFeature>, StoreError> {
        let wanted = name.trim().to_lowercase();
        let bare = wanted
            .strip_suffix(" county")
            .map_or_else(|| wanted.clone(), str::to_owned);
        let row = {
            let connection = self.lock()?;
            connection
                .prepare_cached(
                    "SELECT b.id, b.geoid, b.name, b.geom
                     FROM boundaries b
                     WHERE b.layer = ?1 AND (?2 IS NULL OR b.parent_geoid = ?2)
                       AND lower(b.name) IN (?3, ?4)
                     ORDER BY b.geoid
                     LIMIT 1",
                )
                .and_then(|mut stmt| {
                    stmt.query_row(
                        params![layer.as_str(), parent.map(GeoId::as_str), wanted, bare],
                        BoundaryRow::from_row,
                    )
                    .optional()
                })
                .map_err(StoreError::query("find boundary by name"))?
        };
        row.map(BoundaryRow::into_feature).transpose()
    }

    /// Block groups owned by `county`, with geometry (the `tier` variant when
    /// present), ordered by identifier.
    pub fn units_in_county(
        &self,
        county: &GeoId,
        tier: Option<ToleranceTier>,
    ) -> Result<Vec<UnitRecord>, StoreError> {
        let connection = self.lock()?;
        let rows = connection
            .prepare_cached(
                "SELECT g.geoid, g.total_pop, g.adult_pop, g.centroid_lon, g.centroid_lat,
                        COALESCE(s.geom, g.geom)
                 FROM block_groups g
                 LEFT JOIN simplified_geometries s
                    ON s.layer = 'block_group' AND s.feature_id = g.id AND s.tier = ?2
                 WHERE g.county_geoid = ?1
                 ORDER BY g.geoid",
            )
            .and_then(|mut stmt| {
                stmt.query_map(params![county.as_str(), tier_key(tier)], |row| {
                    Ok((unit_columns(row)?, row.get::<_, Vec<u8>>(5)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()
            })
            .map_err(StoreError::query("list county block groups"))?;
        drop(connection);
        rows.into_iter()
            .map(|(columns, blob)| {
                let mut unit = columns.into_record()?;
                let geometry = decode_geometry(&blob).map_err(|source| StoreError::Geometry {
                    feature: unit.id.to_string(),
                    source,
                })?;
                unit.geometry = Some(geometry);
                Ok(unit)
            })
            .collect()
    }

    /// Block groups whose extents intersect `bounds`, centroids only.
    pub fn unit_centroids_in_bbox(&self, bounds: Rect<f64>) -> Result<Vec<UnitRecord>, StoreError> {
        let connection = self.lock()?;
        let rows = connection
            .prepare_cached(
                "SELECT g.geoid, g.total_pop, g.adult_pop, g.centroid_lon, g.centroid_lat
                 FROM block_group_rtree r
                 JOIN block_groups g ON g.id = r.id
                 WHERE r.max_x >= ?1 AND r.min_x <= ?2 AND r.max_y >= ?3 AND r.min_y <= ?4
                 ORDER BY g.geoid",
            )
            .and_then(|mut stmt| {
                stmt.query_map(
                    params![
                        bounds.min().x,
                        bounds.max().x,
                        bounds.min().y,
                        bounds.max().y
                    ],
                    unit_columns,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()
            })
            .map_err(StoreError::query("select block groups in bbox"))?;
        drop(connection);
        rows.into_iter().map(UnitColumns::into_record).collect()
    }

    /// Block groups of a county as boundary features, for export.
    pub fn unit_features_in_county(
        &self,
        county: &GeoId,
        tier: Option<ToleranceTier>,
    ) -> Result<Vec<BoundaryFeature>, StoreError> {
        Ok(self
            .units_in_county(county, tier)?
            .into_iter()
            .filter_map(|unit| {
                let geometry = unit.geometry?;
                Some(BoundaryFeature {
                    row_id: 0,
                    name: unit_name(&unit.id),
                    id: unit.id,
                    geometry,
                    population: Some(unit.population),
                })
            })
            .collect())
    }

    /// Population summed over block groups, keyed by their state or county
    /// identifier.
    pub fn population_by_prefix(
        &self,
        layer: Layer,
    ) -> Result<HashMap<GeoId, Population>, StoreError> {
        let sql = match layer {
            Layer::State => {
                "SELECT state_geoid, SUM(total_pop), SUM(adult_pop)
                 FROM block_groups GROUP BY state_geoid"
            }
            Layer::County => {
                "SELECT county_geoid, SUM(total_pop), SUM(adult_pop)
                 FROM block_groups GROUP BY county_geoid"
            }
            Layer::BlockGroup => {
                "SELECT geoid, total_pop, adult_pop FROM block_groups"
            }
        };
        let connection = self.lock()?;
        let rows = query_population_rows(&connection, sql)?;
        drop(connection);
        rows.into_iter()
            .map(|(raw, population)| Ok((parse_id(raw)?, population)))
            .collect()
    }

    /// Population of every block group inside `id`.
    pub fn population_within(&self, id: &GeoId) -> Result<Population, StoreError> {
        let connection = self.lock()?;
        let (total, adult): (i64, i64) = connection
            .prepare_cached(
                "SELECT COALESCE(SUM(total_pop), 0), COALESCE(SUM(adult_pop), 0)
                 FROM block_groups WHERE substr(geoid, 1, ?2) = ?1",
            )
            .and_then(|mut stmt| {
                stmt.query_row(params![id.as_str(), id.as_str().len()], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
            })
            .map_err(StoreError::query("sum population"))?;
        Ok(Population::new(count(total), count(adult)))
    }
}

fn query_population_rows(
    connection: &Connection,
    sql: &str,
) -> Result<Vec<(String, Population)>, StoreError> {
    connection
        .prepare_cached(sql)
        .and_then(|mut stmt| {
            stmt.query_map([], |row| {
                let total: i64 = row.get(1)?;
                let adult: i64 = row.get(2)?;
                Ok((row.get(0)?, Population::new(count(total), count(adult))))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
        })
        .map_err(StoreError::query("aggregate population"))
}

struct UnitColumns {
    geoid: String,
    total: i64,
    adult: i64,
    lon: f64,
    lat: f64,
}

impl UnitColumns {
    fn into_record(self) -> Result<UnitRecord, StoreError> {
        Ok(UnitRecord {
            id: parse_id(self.geoid)?,
            population: Population::new(count(self.total), count(self.adult)),
            centroid: Point::new(self.lon, self.lat),
            geometry: None,
        })
    }
}

fn unit_columns(row: &Row<'_>) -> rusqlite::Result<UnitColumns> {
    Ok(UnitColumns {
        geoid: row.get(0)?,
        total: row.get(1)?,
        adult: row.get(2)?,
        lon: row.get(3)?,
        lat: row.get(4)?,
    })
}
