//! Simplified geometry variants.
//!
//! Variants are keyed by `(layer, tier, feature_id)` where `feature_id` is the
//! owning row in `boundaries` or `block_groups`. Writers insert with
//! `OR IGNORE`, so concurrent or repeated maintenance runs never clobber a
//! variant that is already present.

use geo::MultiPolygon;
use rusqlite::params;

use super::codec::{decode_geometry, encode_geometry};
use super::schema::create_derived_tables;
use super::{SpatialStore, StoreError, count};
use crate::geoid::{GeoId, Layer};
use crate::tolerance::ToleranceTier;

/// A feature still waiting for a variant at some tier.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingVariant {
    /// Owning store row.
    pub feature_id: i64,
    /// Identifier of the feature, for logs.
    pub id: GeoId,
    /// Authoritative geometry to simplify.
    pub geometry: MultiPolygon<f64>,
}

fn missing_sql(layer: Layer) -> &'static str {
    match layer {
        Layer::State | Layer::County => {
            "SELECT b.id, b.geoid, b.geom
             FROM boundaries b
             LEFT JOIN simplified_geometries s
                ON s.layer = b.layer AND s.tier = ?2 AND s.feature_id = b.id
             WHERE b.layer = ?1 AND s.feature_id IS NULL
             ORDER BY b.id
             LIMIT ?3"
        }
        Layer::BlockGroup => {
            "SELECT g.id, g.geoid, g.geom
             FROM block_groups g
             LEFT JOIN simplified_geometries s
                ON s.layer = ?1 AND s.tier = ?2 AND s.feature_id = g.id
             WHERE s.feature_id IS NULL
             ORDER BY g.id
             LIMIT ?3"
        }
    }
}

fn count_missing_sql(layer: Layer) -> &'static str {
    match layer {
        Layer::State | Layer::County => {
            "SELECT COUNT(*)
             FROM boundaries b
             LEFT JOIN simplified_geometries s
                ON s.layer = b.layer AND s.tier = ?2 AND s.feature_id = b.id
             WHERE b.layer = ?1 AND s.feature_id IS NULL"
        }
        Layer::BlockGroup => {
            "SELECT COUNT(*)
             FROM block_groups g
             LEFT JOIN simplified_geometries s
                ON s.layer = ?1 AND s.tier = ?2 AND s.feature_id = g.id
             WHERE s.feature_id IS NULL"
        }
    }
}

impl SpatialStore {
    /// Create the variant table if a pre-existing database lacks it.
    pub fn ensure_simplified_schema(&self) -> Result<(), StoreError> {
        let mut connection = self.lock()?;
        let transaction = connection
            .transaction()
            .map_err(StoreError::query("begin variant schema"))?;
        create_derived_tables(&transaction)?;
        transaction
            .commit()
            .map_err(StoreError::query("commit variant schema"))
    }

    /// Features of `layer` without a `tier` variant.
    pub fn count_missing_variants(
        &self,
        layer: Layer,
        tier: ToleranceTier,
    ) -> Result<u64, StoreError> {
        let connection = self.lock()?;
        let value: i64 = connection
            .query_row(
                count_missing_sql(layer),
                params![layer.as_str(), tier.as_str()],
                |row| row.get(0),
            )
            .map_err(StoreError::query("count missing variants"))?;
        Ok(count(value))
    }

    /// Up to `limit` features of `layer` lacking a `tier` variant, in row order.
    pub fn missing_variant_batch(
        &self,
        layer: Layer,
        tier: ToleranceTier,
        limit: usize,
    ) -> Result<Vec<PendingVariant>, StoreError> {
        let connection = self.lock()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = connection
            .prepare_cached(missing_sql(layer))
            .and_then(|mut stmt| {
                stmt.query_map(params![layer.as_str(), tier.as_str(), limit], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()
            })
            .map_err(StoreError::query("select missing variants"))?;
        drop(connection);

        rows.into_iter()
            .map(|(feature_id, geoid, blob)| {
                let id = GeoId::new(geoid.clone()).map_err(|source| StoreError::Identifier {
                    value: geoid,
                    source,
                })?;
                let geometry = decode_geometry(&blob).map_err(|source| StoreError::Geometry {
                    feature: id.to_string(),
                    source,
                })?;
                Ok(PendingVariant {
                    feature_id,
                    id,
                    geometry,
                })
            })
            .collect()
    }

    /// Store variants in one transaction, leaving existing ones in place.
    ///
    /// Returns the number of rows actually inserted.
    pub fn write_variants(
        &self,
        layer: Layer,
        tier: ToleranceTier,
        variants: &[(i64, MultiPolygon<f64>)],
    ) -> Result<u64, StoreError> {
        let mut connection = self.lock()?;
        let transaction = connection
            .transaction()
            .map_err(StoreError::query("begin variant batch"))?;
        let mut inserted = 0_u64;
        {
            let mut stmt = transaction
                .prepare_cached(
                    "INSERT OR IGNORE INTO simplified_geometries (layer, feature_id, tier, geom)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(StoreError::query("prepare variant insert"))?;
            for (feature_id, geometry) in variants {
                let blob = encode_geometry(geometry).map_err(|source| StoreError::Geometry {
                    feature: format!("{layer} row {feature_id}"),
                    source,
                })?;
                let changed = stmt
                    .execute(params![layer.as_str(), feature_id, tier.as_str(), blob])
                    .map_err(StoreError::query("insert variant"))?;
                inserted += changed as u64;
            }
        }
        transaction
            .commit()
            .map_err(StoreError::query("commit variant batch"))?;
        Ok(inserted)
    }

    /// Variants stored for `layer` at `tier`.
    pub fn variant_count(&self, layer: Layer, tier: ToleranceTier) -> Result<u64, StoreError> {
        let connection = self.lock()?;
        let value: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM simplified_geometries WHERE layer = ?1 AND tier = ?2",
                params![layer.as_str(), tier.as_str()],
                |row| row.get(0),
            )
            .map_err(StoreError::query("count variants"))?;
        Ok(count(value))
    }

    /// Drop every variant of `layer` at `tier`, returning rows removed.
    pub fn clear_variants(&self, layer: Layer, tier: ToleranceTier) -> Result<u64, StoreError> {
        let connection = self.lock()?;
        let removed = connection
            .execute(
                "DELETE FROM simplified_geometries WHERE layer = ?1 AND tier = ?2",
                params![layer.as_str(), tier.as_str()],
            )
            .map_err(StoreError::query("clear variants"))?;
        Ok(removed as u64)
    }
}

