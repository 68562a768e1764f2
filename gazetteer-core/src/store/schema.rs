//! Store schema and migrations.

use rusqlite::{Connection, OptionalExtension, Transaction};

use super::StoreError;

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 1;

/// Create or validate the store schema.
///
/// Enables WAL journalling and foreign keys, creates tables, R*Tree indices
/// and secondary indexes, then records the schema version. A database at a
/// different version is rejected so migrations stay explicit.
pub(crate) fn initialise_schema(connection: &mut Connection) -> Result<(), StoreError> {
    connection
        .pragma_update(None, "foreign_keys", true)
        .map_err(|source| StoreError::Migration {
            step: "enable foreign keys",
            source,
        })?;
    // In-memory databases report `memory`; only file-backed stores switch.
    let _: String = connection
        .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
        .map_err(|source| StoreError::Migration {
            step: "enable WAL journal",
            source,
        })?;

    let transaction = connection
        .transaction()
        .map_err(|source| StoreError::Migration {
            step: "begin schema transaction",
            source,
        })?;

    create_feature_tables(&transaction)?;
    create_spatial_indices(&transaction)?;
    create_derived_tables(&transaction)?;
    create_cache_tables(&transaction)?;
    create_audit_tables(&transaction)?;
    ensure_schema_version(&transaction)?;

    transaction.commit().map_err(|source| StoreError::Migration {
        step: "commit schema transaction",
        source,
    })
}

fn create_feature_tables(transaction: &Transaction<'_>) -> Result<(), StoreError> {
    run_migration_step(
        transaction,
        "create boundaries",
        "CREATE TABLE IF NOT EXISTS boundaries (
            id INTEGER PRIMARY KEY,
            layer TEXT NOT NULL CHECK (layer IN ('state', 'county')),
            geoid TEXT NOT NULL,
            name TEXT NOT NULL,
            parent_geoid TEXT,
            geom BLOB NOT NULL,
            geom_digest TEXT NOT NULL,
            UNIQUE (layer, geoid)
        )",
    )?;
    run_migration_step(
        transaction,
        "index boundaries by parent",
        "CREATE INDEX IF NOT EXISTS idx_boundaries_parent
            ON boundaries(layer, parent_geoid)",
    )?;
    run_migration_step(
        transaction,
        "create block_groups",
        "CREATE TABLE IF NOT EXISTS block_groups (
            id INTEGER PRIMARY KEY,
            geoid TEXT NOT NULL UNIQUE CHECK (length(geoid) = 12),
            state_geoid TEXT NOT NULL,
            county_geoid TEXT NOT NULL,
            total_pop INTEGER NOT NULL CHECK (total_pop >= 0),
            adult_pop INTEGER NOT NULL CHECK (adult_pop >= 0),
            geom BLOB NOT NULL,
            geom_digest TEXT NOT NULL,
            centroid_lon REAL NOT NULL,
            centroid_lat REAL NOT NULL
        )",
    )?;
    run_migration_step(
        transaction,
        "index block_groups by county",
        "CREATE INDEX IF NOT EXISTS idx_block_groups_county
            ON block_groups(county_geoid)",
    )?;
    run_migration_step(
        transaction,
        "index block_groups by state",
        "CREATE INDEX IF NOT EXISTS idx_block_groups_state
            ON block_groups(state_geoid)",
    )
}

fn create_spatial_indices(transaction: &Transaction<'_>) -> Result<(), StoreError> {
    run_migration_step(
        transaction,
        "create boundary_rtree",
        "CREATE VIRTUAL TABLE IF NOT EXISTS boundary_rtree
            USING rtree(id, min_x, max_x, min_y, max_y)",
    )?;
    run_migration_step(
        transaction,
        "create block_group_rtree",
        "CREATE VIRTUAL TABLE IF NOT EXISTS block_group_rtree
            USING rtree(id, min_x, max_x, min_y, max_y)",
    )
}

/// Create the simplified-variant table if it is absent.
pub(crate) fn create_derived_tables(transaction: &Transaction<'_>) -> Result<(), StoreError> {
    run_migration_step(
        transaction,
        "create simplified_geometries",
        "CREATE TABLE IF NOT EXISTS simplified_geometries (
            layer TEXT NOT NULL,
            feature_id INTEGER NOT NULL,
            tier TEXT NOT NULL,
            geom BLOB NOT NULL,
            PRIMARY KEY (layer, tier, feature_id)
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "index simplified_geometries by feature",
        "CREATE INDEX IF NOT EXISTS idx_simplified_feature
            ON simplified_geometries(layer, feature_id)",
    )
}

fn create_cache_tables(transaction: &Transaction<'_>) -> Result<(), StoreError> {
    run_migration_step(
        transaction,
        "create tile_cache",
        "CREATE TABLE IF NOT EXISTS tile_cache (
            z INTEGER NOT NULL,
            x INTEGER NOT NULL,
            y INTEGER NOT NULL,
            payload BLOB NOT NULL,
            expires_at INTEGER NOT NULL,
            PRIMARY KEY (z, x, y)
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create isochrones",
        "CREATE TABLE IF NOT EXISTS isochrones (
            lat_e4 INTEGER NOT NULL,
            lon_e4 INTEGER NOT NULL,
            minutes INTEGER NOT NULL CHECK (minutes > 0),
            params_hash TEXT NOT NULL,
            geom BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (lat_e4, lon_e4, minutes, params_hash)
        ) WITHOUT ROWID",
    )
}

fn create_audit_tables(transaction: &Transaction<'_>) -> Result<(), StoreError> {
    run_migration_step(
        transaction,
        "create isochrone_runs",
        "CREATE TABLE IF NOT EXISTS isochrone_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            region TEXT NOT NULL,
            params_hash TEXT NOT NULL,
            grid_spacing_m REAL NOT NULL,
            grid_points INTEGER NOT NULL,
            requests INTEGER NOT NULL,
            failures INTEGER NOT NULL,
            inserted INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            latency_min_ms INTEGER,
            latency_mean_ms INTEGER,
            latency_p95_ms INTEGER,
            latency_max_ms INTEGER,
            environment TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL
        )",
    )?;
    run_migration_step(
        transaction,
        "create archive_downloads",
        "CREATE TABLE IF NOT EXISTS archive_downloads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            layer TEXT NOT NULL,
            scope TEXT NOT NULL,
            url TEXT NOT NULL,
            bytes INTEGER NOT NULL,
            attempts INTEGER NOT NULL,
            downloaded_at INTEGER NOT NULL
        )",
    )
}

fn ensure_schema_version(transaction: &Transaction<'_>) -> Result<(), StoreError> {
    run_migration_step(
        transaction,
        "create schema version table",
        "CREATE TABLE IF NOT EXISTS gazetteer_schema_version (
            version INTEGER PRIMARY KEY CHECK (version > 0),
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        ) WITHOUT ROWID",
    )?;

    let existing: Option<i64> = transaction
        .query_row(
            "SELECT version FROM gazetteer_schema_version LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|source| StoreError::Migration {
            step: "read schema version",
            source,
        })?;

    match existing {
        Some(version) if version == SCHEMA_VERSION => Ok(()),
        Some(found) => Err(StoreError::VersionMismatch {
            expected: SCHEMA_VERSION,
            found,
        }),
        None => transaction
            .execute(
                "INSERT INTO gazetteer_schema_version (version) VALUES (?1)",
                [SCHEMA_VERSION],
            )
            .map(|_| ())
            .map_err(|source| StoreError::Migration {
                step: "record schema version",
                source,
            }),
    }
}

fn run_migration_step(
    transaction: &Transaction<'_>,
    step: &'static str,
    sql: &str,
) -> Result<(), StoreError> {
    transaction
        .execute(sql, [])
        .map(|_| ())
        .map_err(|source| StoreError::Migration { step, source })
}
