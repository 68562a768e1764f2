use std::sync::Arc;

use gazetteer_core::{GeoId, Layer, SpatialStore, StoreError};
use log::{error, info};

use super::{IngestError, Ingestor, LayerReport, MAX_STATE_FIPS, SeedThresholds};
use crate::archive::ArchiveScope;

/// Which stages the coordinator would run against the current store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedPlan {
    /// State outlines are below threshold.
    pub states: bool,
    /// County outlines are below threshold.
    pub counties: bool,
    /// States whose block groups are absent.
    pub block_group_states: Vec<GeoId>,
}

impl SeedPlan {
    /// Whether every stage is already satisfied.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.states && !self.counties && self.block_group_states.is_empty()
    }
}

/// A layer and scope that could not be ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestFailure {
    /// Layer.
    pub layer: Layer,
    /// Scope.
    pub scope: String,
    /// Rendered error.
    pub message: String,
}

/// Summary of one coordinator run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Successful ingestions in run order.
    pub completed: Vec<LayerReport>,
    /// Stages skipped because the store already satisfied them.
    pub skipped: Vec<(Layer, String)>,
    /// Failed ingestions; the run continued past each.
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    /// Whether every attempted ingestion succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn absorb(&mut self, layer: Layer, scope: &ArchiveScope, result: Result<LayerReport, IngestError>) {
        match result {
            Ok(report) => self.completed.push(report),
            Err(err) => {
                error!("{layer} ingestion for {scope} failed: {err}");
                self.failures.push(IngestFailure {
                    layer,
                    scope: scope.to_string(),
                    message: err.to_string(),
                });
            }
        }
    }
}

impl Ingestor {
    /// Inspect the store and decide which stages are needed.
    ///
    /// Block-group states are taken from the configuration, or else from the
    /// state identifiers already loaded up to [`MAX_STATE_FIPS`].
    pub async fn plan(&self) -> Result<SeedPlan, IngestError> {
        let store = Arc::clone(&self.store);
        let thresholds = self.config.thresholds;
        let configured = self.config.states.clone();
        tokio::task::spawn_blocking(move || {
            let states = stage_needed(&store, Layer::State, thresholds)?;
            let counties = stage_needed(&store, Layer::County, thresholds)?;
            let block_group_states = pending_block_group_states(&store, configured.as_deref())?;
            Ok(SeedPlan {
                states,
                counties,
                block_group_states,
            })
        })
        .await
        .map_err(|source| IngestError::Task { source })?
    }

    /// Run every needed stage in order: states, counties, then block groups
    /// per state.
    ///
    /// The block-group scope is resolved after the state stage so a fresh
    /// store picks up the states it just loaded. A failing stage is recorded
    /// and the run moves on.
    pub async fn run(&self) -> Result<IngestReport, IngestError> {
        let mut report = IngestReport::default();
        let initial = self.plan().await?;

        for (layer, needed) in [(Layer::State, initial.states), (Layer::County, initial.counties)] {
            let scope = ArchiveScope::National;
            if needed {
                let result = self.ingest_layer(layer, &scope).await;
                report.absorb(layer, &scope, result);
            } else {
                info!("{layer} layer already loaded; skipping");
                report.skipped.push((layer, scope.to_string()));
            }
        }

        let states = if initial.states {
            self.plan().await?.block_group_states
        } else {
            initial.block_group_states
        };
        if states.is_empty() {
            info!("block groups already loaded for every state in scope");
        }
        for state in states {
            let scope = ArchiveScope::State(state);
            let result = self.ingest_layer(Layer::BlockGroup, &scope).await;
            report.absorb(Layer::BlockGroup, &scope, result);
        }

        info!(
            "ingestion finished: {} completed, {} skipped, {} failed",
            report.completed.len(),
            report.skipped.len(),
            report.failures.len()
        );
        Ok(report)
    }
}

fn stage_needed(
    store: &SpatialStore,
    layer: Layer,
    thresholds: SeedThresholds,
) -> Result<bool, StoreError> {
    let minimum = match layer {
        Layer::State => thresholds.states,
        Layer::County => thresholds.counties,
        Layer::BlockGroup => 1,
    };
    Ok(store.layer_count(layer)? < minimum.max(1))
}

fn pending_block_group_states(
    store: &SpatialStore,
    configured: Option<&[GeoId]>,
) -> Result<Vec<GeoId>, StoreError> {
    let candidates = match configured {
        Some(states) => states.to_vec(),
        None => store
            .state_ids()?
            .into_iter()
            .filter(|id| id.as_str().parse::<u8>().is_ok_and(|fips| fips <= MAX_STATE_FIPS))
            .collect(),
    };
    let mut pending = Vec::new();
    for state in candidates {
        if store.block_group_count_in_state(&state)? == 0 {
            pending.push(state);
        }
    }
    Ok(pending)
}
