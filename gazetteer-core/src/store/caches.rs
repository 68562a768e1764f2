//! Persistent caches and append-only audit rows.
//!
//! Timestamps are Unix seconds supplied by the caller so expiry stays
//! testable.

use geo::MultiPolygon;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};

use super::codec::{decode_geometry, encode_geometry};
use super::load::to_sql_count;
use super::{SpatialStore, StoreError, count};
use crate::geoid::Layer;
use crate::isochrone::IsochroneKey;
use crate::tile::TileCoord;

/// Request latency summary for one isochrone run, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySummary {
    /// Fastest request.
    pub min_ms: u64,
    /// Arithmetic mean.
    pub mean_ms: u64,
    /// 95th percentile (nearest rank).
    pub p95_ms: u64,
    /// Slowest request.
    pub max_ms: u64,
}

/// Audit row written once per isochrone seeding run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsochroneRunRecord {
    /// County identifier the run covered.
    pub region: String,
    /// Hash of the routing parameters.
    pub params_hash: String,
    /// Grid spacing in metres.
    pub grid_spacing_m: f64,
    /// Grid points inside the county.
    pub grid_points: u64,
    /// Routing requests issued.
    pub requests: u64,
    /// Failed requests plus isochrones that could not be stored.
    pub failures: u64,
    /// Isochrones stored.
    pub inserted: u64,
    /// Isochrones skipped because they were already cached.
    pub skipped: u64,
    /// Latency statistics, absent when no request was made.
    pub latency: Option<LatencySummary>,
    /// Serialized description of the host and routing endpoint.
    pub environment: serde_json::Value,
    /// Run start, Unix seconds.
    pub started_at: i64,
    /// Run end, Unix seconds.
    pub finished_at: i64,
}

/// Audit row written for every archive fetched during ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Layer the archive feeds.
    pub layer: Layer,
    /// `us` or the state identifier.
    pub scope: String,
    /// Source URL.
    pub url: String,
    /// Bytes written to disk.
    pub bytes: u64,
    /// Attempts including the successful one.
    pub attempts: u32,
    /// Completion time, Unix seconds.
    pub downloaded_at: i64,
}

fn optional_ms(value: Option<i64>) -> Option<u64> {
    value.map(count)
}

impl SpatialStore {
    /// Cached payload for `coord` if it has not expired at `now`.
    pub fn cached_tile(&self, coord: TileCoord, now: i64) -> Result<Option<Vec<u8>>, StoreError> {
        let connection = self.lock()?;
        connection
            .prepare_cached(
                "SELECT payload FROM tile_cache
                 WHERE z = ?1 AND x = ?2 AND y = ?3 AND expires_at > ?4",
            )
            .and_then(|mut stmt| {
                stmt.query_row(
                    params![coord.z(), coord.x(), coord.y(), now],
                    |row| row.get(0),
                )
                .optional()
            })
            .map_err(StoreError::query("read cached tile"))
    }

    /// Store or replace the payload for `coord`.
    pub fn put_tile(
        &self,
        coord: TileCoord,
        payload: &[u8],
        expires_at: i64,
    ) -> Result<(), StoreError> {
        let connection = self.lock()?;
        connection
            .prepare_cached(
                "INSERT INTO tile_cache (z, x, y, payload, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(z, x, y) DO UPDATE SET
                    payload = excluded.payload,
                    expires_at = excluded.expires_at",
            )
            .and_then(|mut stmt| {
                stmt.execute(params![coord.z(), coord.x(), coord.y(), payload, expires_at])
            })
            .map(|_| ())
            .map_err(StoreError::query("write cached tile"))
    }

    /// Delete tiles that expired at or before `now`.
    pub fn purge_expired_tiles(&self, now: i64) -> Result<u64, StoreError> {
        let connection = self.lock()?;
        let removed = connection
            .execute("DELETE FROM tile_cache WHERE expires_at <= ?1", [now])
            .map_err(StoreError::query("purge expired tiles"))?;
        Ok(removed as u64)
    }

    /// Drop the whole persistent tile cache.
    pub fn clear_tile_cache(&self) -> Result<u64, StoreError> {
        let connection = self.lock()?;
        let removed = connection
            .execute("DELETE FROM tile_cache", [])
            .map_err(StoreError::query("clear tile cache"))?;
        Ok(removed as u64)
    }

    /// Persisted tiles, expired ones included.
    pub fn cached_tile_count(&self) -> Result<u64, StoreError> {
        let connection = self.lock()?;
        let value: i64 = connection
            .query_row("SELECT COUNT(*) FROM tile_cache", [], |row| row.get(0))
            .map_err(StoreError::query("count cached tiles"))?;
        Ok(count(value))
    }

    /// Whether an isochrone is stored under `key`.
    pub fn isochrone_exists(&self, key: &IsochroneKey) -> Result<bool, StoreError> {
        let connection = self.lock()?;
        connection
            .prepare_cached(
                "SELECT EXISTS (
                    SELECT 1 FROM isochrones
                    WHERE lat_e4 = ?1 AND lon_e4 = ?2 AND minutes = ?3 AND params_hash = ?4
                 )",
            )
            .and_then(|mut stmt| {
                stmt.query_row(
                    params![
                        key.origin.lat_e4,
                        key.origin.lon_e4,
                        key.minutes,
                        key.params_hash
                    ],
                    |row| row.get(0),
                )
            })
            .map_err(StoreError::query("check isochrone"))
    }

    /// Store an isochrone unless one already exists under `key`.
    ///
    /// Returns `true` when a row was written.
    pub fn insert_isochrone(
        &self,
        key: &IsochroneKey,
        polygon: &MultiPolygon<f64>,
        created_at: i64,
    ) -> Result<bool, StoreError> {
        let blob = encode_geometry(polygon).map_err(|source| StoreError::Geometry {
            feature: format!("isochrone {}min", key.minutes),
            source,
        })?;
        let connection = self.lock()?;
        let changed = connection
            .prepare_cached(
                "INSERT OR IGNORE INTO isochrones
                    (lat_e4, lon_e4, minutes, params_hash, geom, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .and_then(|mut stmt| {
                stmt.execute(params![
                    key.origin.lat_e4,
                    key.origin.lon_e4,
                    key.minutes,
                    key.params_hash,
                    blob,
                    created_at
                ])
            })
            .map_err(StoreError::query("insert isochrone"))?;
        Ok(changed > 0)
    }

    /// Stored isochrone polygon for `key`.
    pub fn isochrone(&self, key: &IsochroneKey) -> Result<Option<MultiPolygon<f64>>, StoreError> {
        let blob: Option<Vec<u8>> = {
            let connection = self.lock()?;
            connection
                .prepare_cached(
                    "SELECT geom FROM isochrones
                     WHERE lat_e4 = ?1 AND lon_e4 = ?2 AND minutes = ?3 AND params_hash = ?4",
                )
                .and_then(|mut stmt| {
                    stmt.query_row(
                        params![
                            key.origin.lat_e4,
                            key.origin.lon_e4,
                            key.minutes,
                            key.params_hash
                        ],
                        |row| row.get(0),
                    )
                    .optional()
                })
                .map_err(StoreError::query("read isochrone"))?
        };
        blob.map(|bytes| {
            decode_geometry(&bytes).map_err(|source| StoreError::Geometry {
                feature: format!("isochrone {}min", key.minutes),
                source,
            })
        })
        .transpose()
    }

    /// Stored isochrones across all parameter sets.
    pub fn isochrone_count(&self) -> Result<u64, StoreError> {
        let connection = self.lock()?;
        let value: i64 = connection
            .query_row("SELECT COUNT(*) FROM isochrones", [], |row| row.get(0))
            .map_err(StoreError::query("count isochrones"))?;
        Ok(count(value))
    }

    /// Append an isochrone run audit row, returning its id.
    pub fn record_isochrone_run(&self, run: &IsochroneRunRecord) -> Result<i64, StoreError> {
        let environment = run.environment.to_string();
        let latency = run.latency.map(|summary| {
            [
                summary.min_ms,
                summary.mean_ms,
                summary.p95_ms,
                summary.max_ms,
            ]
            .map(to_sql_count)
        });
        let connection = self.lock()?;
        connection
            .prepare_cached(
                "INSERT INTO isochrone_runs (
                    region, params_hash, grid_spacing_m, grid_points, requests, failures,
                    inserted, skipped, latency_min_ms, latency_mean_ms, latency_p95_ms,
                    latency_max_ms, environment, started_at, finished_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )
            .and_then(|mut stmt| {
                stmt.execute(params![
                    run.region,
                    run.params_hash,
                    run.grid_spacing_m,
                    to_sql_count(run.grid_points),
                    to_sql_count(run.requests),
                    to_sql_count(run.failures),
                    to_sql_count(run.inserted),
                    to_sql_count(run.skipped),
                    latency.map(|values| values[0]),
                    latency.map(|values| values[1]),
                    latency.map(|values| values[2]),
                    latency.map(|values| values[3]),
                    environment,
                    run.started_at,
                    run.finished_at
                ])
            })
            .map_err(StoreError::query("record isochrone run"))?;
        Ok(connection.last_insert_rowid())
    }

    /// Isochrone run audit rows, oldest first.
    pub fn isochrone_runs(&self) -> Result<Vec<IsochroneRunRecord>, StoreError> {
        let connection = self.lock()?;
        connection
            .prepare_cached(
                "SELECT region, params_hash, grid_spacing_m, grid_points, requests, failures,
                        inserted, skipped, latency_min_ms, latency_mean_ms, latency_p95_ms,
                        latency_max_ms, environment, started_at, finished_at
                 FROM isochrone_runs ORDER BY id",
            )
            .and_then(|mut stmt| {
                stmt.query_map([], |row| {
                    let min = optional_ms(row.get(8)?);
                    let mean = optional_ms(row.get(9)?);
                    let p95 = optional_ms(row.get(10)?);
                    let max = optional_ms(row.get(11)?);
                    let latency = match (min, mean, p95, max) {
                        (Some(min_ms), Some(mean_ms), Some(p95_ms), Some(max_ms)) => {
                            Some(LatencySummary {
                                min_ms,
                                mean_ms,
                                p95_ms,
                                max_ms,
                            })
                        }
                        _ => None,
                    };
                    let environment: String = row.get(12)?;
                    Ok(IsochroneRunRecord {
                        region: row.get(0)?,
                        params_hash: row.get(1)?,
                        grid_spacing_m: row.get(2)?,
                        grid_points: count(row.get(3)?),
                        requests: count(row.get(4)?),
                        failures: count(row.get(5)?),
                        inserted: count(row.get(6)?),
                        skipped: count(row.get(7)?),
                        latency,
                        environment: serde_json::from_str(&environment)
                            .unwrap_or(serde_json::Value::String(environment)),
                        started_at: row.get(13)?,
                        finished_at: row.get(14)?,
                    })
                })?
                .collect()
            })
            .map_err(StoreError::query("list isochrone runs"))
    }

    /// Append an archive download audit row.
    pub fn record_download(&self, download: &DownloadRecord) -> Result<(), StoreError> {
        let connection = self.lock()?;
        connection
            .prepare_cached(
                "INSERT INTO archive_downloads (layer, scope, url, bytes, attempts, downloaded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .and_then(|mut stmt| {
                stmt.execute(params![
                    download.layer.as_str(),
                    download.scope,
                    download.url,
                    to_sql_count(download.bytes),
                    download.attempts,
                    download.downloaded_at
                ])
            })
            .map(|_| ())
            .map_err(StoreError::query("record download"))
    }

    /// Archive download audit rows, oldest first.
    pub fn downloads(&self) -> Result<Vec<DownloadRecord>, StoreError> {
        let rows: Vec<(String, String, String, i64, u32, i64)> = {
            let connection = self.lock()?;
            connection
                .prepare_cached(
                    "SELECT layer, scope, url, bytes, attempts, downloaded_at
                     FROM archive_downloads ORDER BY id",
                )
                .and_then(|mut stmt| {
                    stmt.query_map([], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                        ))
                    })?
                    .collect()
                })
                .map_err(StoreError::query("list downloads"))?
        };
        rows.into_iter()
            .map(|(layer, scope, url, bytes, attempts, downloaded_at)| {
                let layer = layer.parse().map_err(|source| StoreError::Identifier {
                    value: layer.clone(),
                    source,
                })?;
                Ok(DownloadRecord {
                    layer,
                    scope,
                    url,
                    bytes: count(bytes),
                    attempts,
                    downloaded_at,
                })
            })
            .collect()
    }
}
