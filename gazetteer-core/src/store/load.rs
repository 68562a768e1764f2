//! Batched writers for boundary and block-group loads.
//!
//! A [`LoadSession`] buffers rows and commits every `batch_size` of them,
//! holding the connection only while a batch is written. A failing row rolls
//! back only its batch; the session logs the loss and carries on with the
//! next one.

use geo::{BoundingRect, Centroid, MultiPolygon, Rect};
use log::warn;
use rusqlite::{Connection, OptionalExtension, params};

use super::codec::{GeometryCodecError, encode_geometry, geometry_digest};
use super::{SpatialStore, StoreError};
use crate::boundary::{AdminBoundary, BlockGroupUnit};
use crate::geoid::Layer;

/// Rows committed per transaction when the caller does not choose.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// How rows reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Plain inserts for a scope that holds no rows yet.
    Bulk,
    /// Insert-or-update keyed by the natural identifier.
    Upsert,
}

/// Effect of writing one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new row was created.
    Inserted,
    /// Attributes were refreshed; geometry and derived columns untouched.
    Refreshed,
    /// Geometry changed; centroid recomputed and simplified variants dropped.
    Replaced,
}

/// Totals for one load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Rows inserted.
    pub inserted: u64,
    /// Rows whose geometry was unchanged.
    pub refreshed: u64,
    /// Rows whose geometry was replaced.
    pub replaced: u64,
    /// Rows lost to failed batches.
    pub failed_rows: u64,
    /// Batches rolled back.
    pub failed_batches: u64,
}

impl LoadSummary {
    /// Rows that reached the store.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.inserted + self.refreshed + self.replaced
    }

    fn record(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Inserted => self.inserted += 1,
            WriteOutcome::Refreshed => self.refreshed += 1,
            WriteOutcome::Replaced => self.replaced += 1,
        }
    }

    fn absorb(&mut self, batch: Self) {
        self.inserted += batch.inserted;
        self.refreshed += batch.refreshed;
        self.replaced += batch.replaced;
    }
}

/// Row waiting for its batch to be flushed.
enum PendingRow {
    Boundary(AdminBoundary),
    Unit(BlockGroupUnit),
}

impl PendingRow {
    fn feature(&self) -> &str {
        match self {
            Self::Boundary(boundary) => boundary.id.as_str(),
            Self::Unit(unit) => unit.id.as_str(),
        }
    }

    fn write(&self, connection: &Connection, mode: LoadMode) -> Result<WriteOutcome, StoreError> {
        match self {
            Self::Boundary(boundary) => write_boundary_row(connection, mode, boundary),
            Self::Unit(unit) => write_unit_row(connection, mode, unit),
        }
    }
}

/// Open load against the store. See [`SpatialStore::load`].
pub struct LoadSession<'store> {
    store: &'store SpatialStore,
    mode: LoadMode,
    batch_size: usize,
    pending: Vec<PendingRow>,
    summary: LoadSummary,
}

impl SpatialStore {
    /// Run `body` with a [`LoadSession`], flushing the final batch when it
    /// returns successfully.
    ///
    /// Rows are buffered until `batch_size` of them are pending and then
    /// written in one transaction. The connection lock is only taken while a
    /// batch is flushed, so readers interleave with a long load.
    ///
    /// If `body` fails, the pending batch is discarded and the error returned;
    /// batches flushed earlier stay in place.
    ///
    /// # Examples
    ///
    /// ```
    /// use gazetteer_core::{AdminBoundary, LoadMode, SpatialStore, StoreError};
    /// use geo::{MultiPolygon, Rect, coord};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let store = SpatialStore::open_in_memory()?;
    /// let outline = MultiPolygon::new(vec![
    ///     Rect::new(coord! { x: -124.0, y: 32.0 }, coord! { x: -114.0, y: 42.0 }).to_polygon(),
    /// ]);
    /// let state = AdminBoundary::new("06".parse()?, "California", outline)?;
    /// let summary = store.load(LoadMode::Bulk, 100, |session| {
    ///     session.write_boundary(&state)?;
    ///     Ok::<(), StoreError>(())
    /// })?;
    /// assert_eq!(summary.inserted, 1);
    /// # Ok(())
    /// # }
    /// ```
    pub fn load<F, E>(&self, mode: LoadMode, batch_size: usize, body: F) -> Result<LoadSummary, E>
    where
        F: FnOnce(&mut LoadSession<'_>) -> Result<(), E>,
        E: From<StoreError>,
    {
        let batch_size = batch_size.max(1);
        let mut session = LoadSession {
            store: self,
            mode,
            batch_size,
            pending: Vec::new(),
            summary: LoadSummary::default(),
        };
        body(&mut session)?;
        session.flush()?;
        Ok(session.summary)
    }
}

impl LoadSession<'_> {
    /// Queue a state or county outline.
    pub fn write_boundary(&mut self, boundary: &AdminBoundary) -> Result<(), StoreError> {
        self.push(PendingRow::Boundary(boundary.clone()))
    }

    /// Queue a block group with its counts.
    pub fn write_unit(&mut self, unit: &BlockGroupUnit) -> Result<(), StoreError> {
        self.push(PendingRow::Unit(unit.clone()))
    }

    /// Totals committed so far.
    #[must_use]
    pub const fn committed(&self) -> LoadSummary {
        self.summary
    }

    fn push(&mut self, row: PendingRow) -> Result<(), StoreError> {
        self.pending.push(row);
        if self.pending.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Write the pending rows in one transaction.
    ///
    /// A failing row rolls back the whole batch; the loss is logged and
    /// counted and the session carries on. Only failures to open or commit
    /// the transaction are returned.
    fn flush(&mut self) -> Result<(), StoreError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(&mut self.pending);
        let connection = self.store.lock()?;
        connection
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(StoreError::query("begin load batch"))?;
        let mut batch = LoadSummary::default();
        for row in &rows {
            match row.write(&connection, self.mode) {
                Ok(outcome) => batch.record(outcome),
                Err(err) => {
                    warn!(
                        "rolling back batch of {} rows after failure on {}: {err}",
                        rows.len(),
                        row.feature()
                    );
                    if let Err(rollback) = connection.execute_batch("ROLLBACK") {
                        warn!("rollback of load batch failed: {rollback}");
                    }
                    self.summary.failed_rows += u64::try_from(rows.len()).unwrap_or(u64::MAX);
                    self.summary.failed_batches += 1;
                    return Ok(());
                }
            }
        }
        connection
            .execute_batch("COMMIT")
            .map_err(StoreError::query("commit load batch"))?;
        self.summary.absorb(batch);
        Ok(())
    }
}

struct EncodedGeometry {
    blob: Vec<u8>,
    digest: String,
    bounds: Rect<f64>,
}

fn encode(feature: &str, geometry: &MultiPolygon<f64>) -> Result<EncodedGeometry, StoreError> {
    let blob = encode_geometry(geometry).map_err(|source| StoreError::Geometry {
        feature: feature.to_owned(),
        source,
    })?;
    let bounds = geometry
        .bounding_rect()
        .ok_or_else(|| StoreError::Geometry {
            feature: feature.to_owned(),
            source: GeometryCodecError::Empty,
        })?;
    let digest = geometry_digest(&blob);
    Ok(EncodedGeometry {
        blob,
        digest,
        bounds,
    })
}

fn write_boundary_row(
    connection: &Connection,
    mode: LoadMode,
    boundary: &AdminBoundary,
) -> Result<WriteOutcome, StoreError> {
    let layer = boundary.layer().as_str();
    let geoid = boundary.id.as_str();
    let parent = boundary.parent().map(String::from);
    let encoded = encode(geoid, &boundary.geometry)?;

    let prior = match mode {
        LoadMode::Bulk => None,
        LoadMode::Upsert => connection
            .prepare_cached("SELECT id, geom_digest FROM boundaries WHERE layer = ?1 AND geoid = ?2")
            .and_then(|mut stmt| {
                stmt.query_row(params![layer, geoid], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })
                .optional()
            })
            .map_err(StoreError::query("look up boundary"))?,
    };

    let id: i64 = connection
        .prepare_cached(
            "INSERT INTO boundaries (layer, geoid, name, parent_geoid, geom, geom_digest)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(layer, geoid) DO UPDATE SET
                name = excluded.name,
                parent_geoid = excluded.parent_geoid,
                geom = excluded.geom,
                geom_digest = excluded.geom_digest
             RETURNING id",
        )
        .and_then(|mut stmt| {
            stmt.query_row(
                params![
                    layer,
                    geoid,
                    boundary.name,
                    parent,
                    encoded.blob,
                    encoded.digest
                ],
                |row| row.get(0),
            )
        })
        .map_err(StoreError::query("upsert boundary"))?;

    let outcome = classify(prior.as_ref().map(|(_, digest)| digest.as_str()), &encoded.digest);
    if outcome != WriteOutcome::Refreshed {
        index_bounds(connection, boundary.layer(), id, encoded.bounds)?;
    }
    if outcome == WriteOutcome::Replaced {
        drop_variants(connection, boundary.layer(), id)?;
    }
    Ok(outcome)
}

fn write_unit_row(
    connection: &Connection,
    mode: LoadMode,
    unit: &BlockGroupUnit,
) -> Result<WriteOutcome, StoreError> {
    let geoid = unit.id.as_str();
    let encoded = encode(geoid, &unit.geometry)?;
    let centroid = unit
        .geometry
        .centroid()
        .ok_or_else(|| StoreError::Geometry {
            feature: geoid.to_owned(),
            source: GeometryCodecError::Empty,
        })?;

    let prior = match mode {
        LoadMode::Bulk => None,
        LoadMode::Upsert => connection
            .prepare_cached("SELECT id, geom_digest FROM block_groups WHERE geoid = ?1")
            .and_then(|mut stmt| {
                stmt.query_row([geoid], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })
                .optional()
            })
            .map_err(StoreError::query("look up block group"))?,
    };
    let outcome = classify(prior.as_ref().map(|(_, digest)| digest.as_str()), &encoded.digest);

    // The centroid is only written for new rows here; replaced geometries get
    // an explicit recomputation below.
    let id: i64 = connection
        .prepare_cached(
            "INSERT INTO block_groups (geoid, state_geoid, county_geoid, total_pop, adult_pop,
                                       geom, geom_digest, centroid_lon, centroid_lat)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(geoid) DO UPDATE SET
                total_pop = excluded.total_pop,
                adult_pop = excluded.adult_pop,
                geom = excluded.geom,
                geom_digest = excluded.geom_digest
             RETURNING id",
        )
        .and_then(|mut stmt| {
            stmt.query_row(
                params![
                    geoid,
                    unit.id.state().as_str(),
                    unit.id.county().as_str(),
                    to_sql_count(unit.population.total),
                    to_sql_count(unit.population.adult),
                    encoded.blob,
                    encoded.digest,
                    centroid.x(),
                    centroid.y()
                ],
                |row| row.get(0),
            )
        })
        .map_err(StoreError::query("upsert block group"))?;

    if outcome == WriteOutcome::Replaced {
        connection
            .prepare_cached(
                "UPDATE block_groups SET centroid_lon = ?2, centroid_lat = ?3 WHERE id = ?1",
            )
            .and_then(|mut stmt| stmt.execute(params![id, centroid.x(), centroid.y()]))
            .map_err(StoreError::query("recompute block group centroid"))?;
        drop_variants(connection, Layer::BlockGroup, id)?;
    }
    if outcome != WriteOutcome::Refreshed {
        index_bounds(connection, Layer::BlockGroup, id, encoded.bounds)?;
    }
    Ok(outcome)
}

fn classify(prior_digest: Option<&str>, digest: &str) -> WriteOutcome {
    match prior_digest {
        None => WriteOutcome::Inserted,
        Some(existing) if existing == digest => WriteOutcome::Refreshed,
        Some(_) => WriteOutcome::Replaced,
    }
}

fn index_bounds(
    connection: &Connection,
    layer: Layer,
    id: i64,
    bounds: Rect<f64>,
) -> Result<(), StoreError> {
    let sql = match layer {
        Layer::State | Layer::County => {
            "INSERT OR REPLACE INTO boundary_rtree (id, min_x, max_x, min_y, max_y)
             VALUES (?1, ?2, ?3, ?4, ?5)"
        }
        Layer::BlockGroup => {
            "INSERT OR REPLACE INTO block_group_rtree (id, min_x, max_x, min_y, max_y)
             VALUES (?1, ?2, ?3, ?4, ?5)"
        }
    };
    connection
        .prepare_cached(sql)
        .and_then(|mut stmt| {
            stmt.execute(params![
                id,
                bounds.min().x,
                bounds.max().x,
                bounds.min().y,
                bounds.max().y
            ])
        })
        .map(|_| ())
        .map_err(StoreError::query("index feature bounds"))
}

fn drop_variants(connection: &Connection, layer: Layer, id: i64) -> Result<(), StoreError> {
    connection
        .prepare_cached("DELETE FROM simplified_geometries WHERE layer = ?1 AND feature_id = ?2")
        .and_then(|mut stmt| stmt.execute(params![layer.as_str(), id]))
        .map(|_| ())
        .map_err(StoreError::query("drop stale simplified variants"))
}

/// SQLite integers are signed; counts beyond `i64::MAX` saturate.
pub(crate) fn to_sql_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
