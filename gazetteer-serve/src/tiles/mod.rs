//! Vector tile rendering behind a two-tier cache.
//!
//! [`TileService::tile`] consults the in-process cache, then the store's
//! persistent cache (promoting hits), and only then renders from boundary
//! geometry. Rendered tiles are written to both tiers. Tiles without any
//! feature and failed renders are never cached.

mod clip;
mod memory;
mod render;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use gazetteer_core::{SpatialStore, StoreError, TileCoord};
use log::{debug, warn};
use thiserror::Error;

use crate::unix_now;
use memory::MemoryTileCache;

/// Tile side length in pixel units.
pub const DEFAULT_EXTENT: u32 = 4096;
/// Pixels drawn beyond each tile edge.
pub const DEFAULT_BUFFER: u32 = 64;
/// First zoom level that carries the county layer.
pub const DEFAULT_COUNTY_MIN_ZOOM: u8 = 6;

/// Errors raised while producing a tile.
#[derive(Debug, Error)]
pub enum TileError {
    /// A store read or cache write failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The encoder rejected a geometry or layer.
    #[error("failed to encode {layer} for tile {coord}: {source}")]
    Encode {
        /// Tile being rendered.
        coord: TileCoord,
        /// Sub-layer being encoded.
        layer: &'static str,
        /// Encoder error.
        #[source]
        source: mvt::Error,
    },
    /// The blocking render task failed.
    #[error("tile task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Tile service settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileServiceConfig {
    /// Pixel units per tile side.
    pub extent: u32,
    /// Pixel buffer around each tile.
    pub buffer: u32,
    /// First zoom level drawing counties.
    pub county_min_zoom: u8,
    /// Lifetime of tiles that include counties.
    pub county_ttl: Duration,
    /// Lifetime of state-only tiles.
    pub state_ttl: Duration,
    /// Entries kept in the in-process cache.
    pub memory_capacity: usize,
}

impl Default for TileServiceConfig {
    fn default() -> Self {
        Self {
            extent: DEFAULT_EXTENT,
            buffer: DEFAULT_BUFFER,
            county_min_zoom: DEFAULT_COUNTY_MIN_ZOOM,
            county_ttl: Duration::from_secs(60 * 60),
            state_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            memory_capacity: 4096,
        }
    }
}

impl TileServiceConfig {
    /// Set the first zoom level drawing counties.
    #[must_use]
    pub fn with_county_min_zoom(mut self, zoom: u8) -> Self {
        self.county_min_zoom = zoom;
        self
    }

    /// Set the in-process cache size.
    #[must_use]
    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = capacity;
        self
    }

    /// Cache lifetime for `coord`.
    #[must_use]
    pub fn ttl_for(&self, coord: TileCoord) -> Duration {
        if coord.z() >= self.county_min_zoom {
            self.county_ttl
        } else {
            self.state_ttl
        }
    }
}

/// Where a served tile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileSource {
    /// In-process cache.
    Memory,
    /// Persistent store cache.
    Store,
    /// Freshly rendered.
    Rendered,
}

impl TileSource {
    /// Label used in the `x-tile-cache` response header.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Store => "store",
            Self::Rendered => "miss",
        }
    }
}

/// A tile ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedTile {
    /// Encoded vector tile.
    pub payload: Bytes,
    /// Client cache lifetime.
    pub max_age: Duration,
    /// Cache tier that answered.
    pub source: TileSource,
}

/// Renders and caches vector tiles from a store.
#[derive(Debug)]
pub struct TileService {
    store: Arc<SpatialStore>,
    config: TileServiceConfig,
    memory: MemoryTileCache,
}

impl TileService {
    /// Build a service over `store`.
    #[must_use]
    pub fn new(store: Arc<SpatialStore>, config: TileServiceConfig) -> Self {
        let memory = MemoryTileCache::new(config.memory_capacity);
        Self {
            store,
            config,
            memory,
        }
    }

    /// Service settings.
    #[must_use]
    pub fn config(&self) -> &TileServiceConfig {
        &self.config
    }

    /// Tiles held in the in-process cache.
    #[must_use]
    pub fn memory_entries(&self) -> usize {
        self.memory.len()
    }

    /// Produce the tile at `coord`, or `None` when nothing falls inside it.
    pub async fn tile(&self, coord: TileCoord) -> Result<Option<ServedTile>, TileError> {
        let max_age = self.config.ttl_for(coord);
        let now = unix_now();
        if let Some(payload) = self.memory.get(coord, now) {
            return Ok(Some(ServedTile {
                payload,
                max_age,
                source: TileSource::Memory,
            }));
        }

        let store = Arc::clone(&self.store);
        let config = self.config.clone();
        let found = tokio::task::spawn_blocking(move || lookup_or_render(&store, coord, &config, now))
            .await??;
        let Some((payload, expires_at, source)) = found else {
            debug!("tile {coord} is empty");
            return Ok(None);
        };
        let payload = Bytes::from(payload);
        self.memory.insert(coord, payload.clone(), expires_at);
        Ok(Some(ServedTile {
            payload,
            max_age,
            source,
        }))
    }
}

fn lookup_or_render(
    store: &SpatialStore,
    coord: TileCoord,
    config: &TileServiceConfig,
    now: i64,
) -> Result<Option<(Vec<u8>, i64, TileSource)>, TileError> {
    let expires_at = now.saturating_add(ttl_secs(config.ttl_for(coord)));
    if let Some(payload) = store.cached_tile(coord, now)? {
        return Ok(Some((payload, expires_at, TileSource::Store)));
    }
    let Some(payload) = render::render_tile(store, coord, config)? else {
        return Ok(None);
    };
    if let Err(err) = store.put_tile(coord, &payload, expires_at) {
        warn!("failed to persist tile {coord}: {err}");
    }
    Ok(Some((payload, expires_at, TileSource::Rendered)))
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}
