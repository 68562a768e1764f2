//! SQLite-backed spatial store.
//!
//! The store is the ground truth for every layer. It keeps authoritative
//! geometries as versioned blobs, indexes their bounding boxes in SQLite
//! R*Tree virtual tables and holds the persistent caches (tiles, isochrones)
//! alongside the append-only audit tables.
//!
//! One connection sits behind a mutex; callers on async runtimes should use
//! the blocking pool.

mod caches;
mod codec;
mod derived;
mod load;
mod query;
mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

use crate::geoid::Layer;
use crate::tolerance::ToleranceTier;

pub use caches::{DownloadRecord, IsochroneRunRecord, LatencySummary};
pub use codec::GeometryCodecError;
pub use derived::PendingVariant;
pub use load::{DEFAULT_BATCH_SIZE, LoadMode, LoadSession, LoadSummary, WriteOutcome};
pub use schema::SCHEMA_VERSION;

/// Errors raised by [`SpatialStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Opening the database failed.
    #[error("failed to open SQLite database at {path}: {source}")]
    Open {
        /// Database location.
        path: PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// A schema step failed.
    #[error("failed to execute migration step '{step}': {source}")]
    Migration {
        /// Step description.
        step: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// The database was created by a different schema version.
    #[error("expected store schema version {expected} but found {found}")]
    VersionMismatch {
        /// Version this build writes.
        expected: i64,
        /// Version found on disk.
        found: i64,
    },
    /// A statement failed.
    #[error("store operation '{operation}' failed: {source}")]
    Query {
        /// Operation description.
        operation: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// A stored geometry could not be encoded or decoded.
    #[error("geometry for {feature} is unreadable: {source}")]
    Geometry {
        /// Identifier of the feature.
        feature: String,
        /// Codec failure.
        #[source]
        source: GeometryCodecError,
    },
    /// A stored identifier no longer parses.
    #[error("stored identifier {value:?} is invalid: {source}")]
    Identifier {
        /// Raw value.
        value: String,
        /// Parse failure.
        #[source]
        source: crate::geoid::GeoIdError,
    },
    /// A previous holder of the connection panicked.
    #[error("store connection lock was poisoned")]
    Poisoned,
}

impl StoreError {
    pub(crate) fn query(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Query { operation, source }
    }
}

/// Row counts and cache sizes reported by `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoreStatus {
    /// Rows per layer.
    pub layers: Vec<(Layer, u64)>,
    /// Simplified variants per layer and tier.
    pub variants: Vec<(Layer, ToleranceTier, u64)>,
    /// Stored isochrone polygons.
    pub isochrones: u64,
    /// Persisted tile cache entries, expired or not.
    pub cached_tiles: u64,
}

/// Spatial store over a single SQLite database.
pub struct SpatialStore {
    connection: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SpatialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SpatialStore {
    /// Open or create a store at `path` and bring its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let mut connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        schema::initialise_schema(&mut connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory store, mostly useful in tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut connection =
            Connection::open_in_memory().map_err(|source| StoreError::Open {
                path: PathBuf::from(":memory:"),
                source,
            })?;
        schema::initialise_schema(&mut connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
            path: None,
        })
    }

    /// Location of the database file, if file-backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.connection.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Summarise row counts for health checks.
    pub fn status(&self) -> Result<StoreStatus, StoreError> {
        let mut status = StoreStatus::default();
        for layer in Layer::ALL {
            status.layers.push((layer, self.layer_count(layer)?));
            for &tier in ToleranceTier::defaults_for(layer) {
                status
                    .variants
                    .push((layer, tier, self.variant_count(layer, tier)?));
            }
        }
        status.isochrones = self.isochrone_count()?;
        status.cached_tiles = self.cached_tile_count()?;
        Ok(status)
    }
}

/// Convert a SQLite integer count into `u64`.
pub(crate) fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
