//! Shared handler state.

use std::sync::Arc;

use gazetteer_core::SpatialStore;

use crate::context::{ContextAggregator, ContextConfig, ContextSource, StoreContextSource};
use crate::seed::SeedLauncher;
use crate::tiles::{TileService, TileServiceConfig};

/// Settings for the serving components.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServeConfig {
    /// Tile rendering and caching.
    pub tiles: TileServiceConfig,
    /// County context aggregation.
    pub context: ContextConfig,
}

/// State cloned into every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Backing store.
    pub store: Arc<SpatialStore>,
    /// Tile renderer and caches.
    pub tiles: Arc<TileService>,
    /// County context aggregator.
    pub contexts: Arc<ContextAggregator>,
    /// Background ingestion trigger.
    pub seeder: Arc<SeedLauncher>,
}

impl AppState {
    /// Wire the serving components over `store`.
    #[must_use]
    pub fn new(store: Arc<SpatialStore>, seeder: Arc<SeedLauncher>, config: ServeConfig) -> Self {
        let source: Arc<dyn ContextSource> = Arc::new(StoreContextSource::new(
            Arc::clone(&store),
            config.context.lite_buffer_m,
        ));
        Self {
            tiles: Arc::new(TileService::new(Arc::clone(&store), config.tiles)),
            contexts: Arc::new(ContextAggregator::new(source, config.context)),
            store,
            seeder,
        }
    }
}
