use std::path::Path;
use std::sync::Arc;

use gazetteer_core::{
    AdminBoundary, BlockGroupUnit, DownloadRecord, GeoId, Layer, LoadMode, LoadSummary,
    Population, SpatialStore, StoreError,
};
use log::{debug, info, warn};

use super::{IngestConfig, IngestError};
use crate::archive::{ArchiveScope, ArchiveSource};
use crate::census::{CensusTable, CountsSource};
use crate::tiger::{ShapeStats, extract_shapefile, for_each_shape};
use crate::unix_now;

/// Outcome of ingesting one layer and scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerReport {
    /// Layer ingested.
    pub layer: Layer,
    /// Scope ingested, `us` for national archives.
    pub scope: String,
    /// Archive URL.
    pub url: String,
    /// Archive size in bytes.
    pub bytes: u64,
    /// Attempts used, including the successful one.
    pub attempts: u32,
    /// Whether rows were bulk inserted or upserted.
    pub mode: LoadMode,
    /// Store totals.
    pub load: LoadSummary,
    /// Shapefile read totals.
    pub shapes: ShapeStats,
    /// Block groups absent from the counts table, loaded with zero counts.
    pub missing_counts: u64,
}

/// Drives ingestion against one store with injected upstream sources.
#[derive(Clone)]
pub struct Ingestor {
    pub(super) store: Arc<SpatialStore>,
    archives: Arc<dyn ArchiveSource>,
    counts: Arc<dyn CountsSource>,
    pub(super) config: IngestConfig,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct Download {
    url: String,
    bytes: u64,
    file: tempfile::NamedTempFile,
}

struct Loaded {
    mode: LoadMode,
    load: LoadSummary,
    shapes: ShapeStats,
    missing_counts: u64,
}

impl Ingestor {
    /// Build an ingestor.
    pub fn new(
        store: Arc<SpatialStore>,
        archives: Arc<dyn ArchiveSource>,
        counts: Arc<dyn CountsSource>,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            archives,
            counts,
            config,
        }
    }

    /// Store this ingestor writes to.
    #[must_use]
    pub fn store(&self) -> &Arc<SpatialStore> {
        &self.store
    }

    /// Download, parse and load `layer` for `scope`, retrying the whole cycle
    /// under the configured policy.
    ///
    /// Non-retryable failures (a missing catalog entry, an HTTP 404, a store
    /// fault) end the loop immediately.
    pub async fn ingest_layer(
        &self,
        layer: Layer,
        scope: &ArchiveScope,
    ) -> Result<LayerReport, IngestError> {
        let policy = self.config.retry;
        let attempts = policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(layer, scope, attempt).await {
                Ok(report) => {
                    info!(
                        "{layer} {scope}: {} inserted, {} refreshed, {} replaced, {} failed rows \
                         ({} bytes, attempt {attempt})",
                        report.load.inserted,
                        report.load.refreshed,
                        report.load.replaced,
                        report.load.failed_rows,
                        report.bytes
                    );
                    return Ok(report);
                }
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = policy.delay_after(attempt);
                    warn!(
                        "{layer} {scope} attempt {attempt}/{attempts} failed: {err}; retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(IngestError::Exhausted {
                        layer,
                        scope: scope.to_string(),
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
            }
        }
    }

    async fn attempt(
        &self,
        layer: Layer,
        scope: &ArchiveScope,
        attempt: u32,
    ) -> Result<LayerReport, IngestError> {
        let download = self.download(layer, scope).await?;
        let counts = match (layer, scope) {
            (Layer::BlockGroup, ArchiveScope::State(state)) => {
                Some(self.counts.fetch_counts(state).await?)
            }
            _ => None,
        };

        let record = DownloadRecord {
            layer,
            scope: scope.to_string(),
            url: download.url.clone(),
            bytes: download.bytes,
            attempts: attempt,
            downloaded_at: unix_now(),
        };
        let store = Arc::clone(&self.store);
        let scope_owned = scope.clone();
        let batch_size = self.config.effective_batch_size();
        let scratch = self.config.scratch_dir.clone();
        let archive_path = download.file.path().to_path_buf();
        let loaded = tokio::task::spawn_blocking(move || {
            store.record_download(&record)?;
            let extracted = extract_shapefile(&archive_path, scratch.as_deref())?;
            load_archive(
                &store,
                layer,
                &scope_owned,
                extracted.shp_path(),
                counts.as_ref(),
                batch_size,
            )
        })
        .await
        .map_err(|source| IngestError::Task { source })??;
        drop(download.file);

        Ok(LayerReport {
            layer,
            scope: scope.to_string(),
            url: download.url,
            bytes: download.bytes,
            attempts: attempt,
            mode: loaded.mode,
            load: loaded.load,
            shapes: loaded.shapes,
            missing_counts: loaded.missing_counts,
        })
    }

    async fn download(&self, layer: Layer, scope: &ArchiveScope) -> Result<Download, IngestError> {
        let url = self.config.catalog.url_for(layer, scope)?;
        let mut file = self.scratch_file()?;
        debug!("downloading {layer} {scope} from {url}");
        let bytes = self
            .archives
            .fetch_archive(&url, file.as_file_mut())
            .await
            .map_err(|source| IngestError::Download { source })?;
        Ok(Download { url, bytes, file })
    }

    fn scratch_file(&self) -> Result<tempfile::NamedTempFile, IngestError> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("archive-").suffix(".zip");
            builder
        };
        match &self.config.scratch_dir {
            Some(dir) => {
                gazetteer_fs::ensure_dir(dir).map_err(|source| IngestError::Scratch {
                    path: dir.as_std_path().to_path_buf(),
                    source,
                })?;
                builder.tempfile_in(dir).map_err(|source| IngestError::Scratch {
                    path: dir.as_std_path().to_path_buf(),
                    source,
                })
            }
            None => builder.tempfile().map_err(|source| IngestError::Scratch {
                path: std::env::temp_dir(),
                source,
            }),
        }
    }
}

/// Bulk mode applies when the scope holds no rows yet.
fn choose_mode(store: &SpatialStore, layer: Layer, scope: &ArchiveScope) -> Result<LoadMode, StoreError> {
    let existing = match (layer, scope) {
        (Layer::BlockGroup, ArchiveScope::State(state)) => store.block_group_count_in_state(state)?,
        _ => store.layer_count(layer)?,
    };
    Ok(if existing == 0 {
        LoadMode::Bulk
    } else {
        LoadMode::Upsert
    })
}

fn load_archive(
    store: &SpatialStore,
    layer: Layer,
    scope: &ArchiveScope,
    shp_path: &Path,
    counts: Option<&CensusTable>,
    batch_size: usize,
) -> Result<Loaded, IngestError> {
    let mode = choose_mode(store, layer, scope)?;
    let mut shapes = ShapeStats::default();
    let mut missing_counts = 0_u64;
    let mut rejected = 0_u64;
    let load = store.load(mode, batch_size, |session| {
        shapes = for_each_shape(shp_path, layer, |record| {
            if let ArchiveScope::State(state) = scope
                && !record.id.is_within(state)
            {
                debug!("skipping {} outside state {state}", record.id);
                rejected += 1;
                return Ok(());
            }
            match layer {
                Layer::State | Layer::County => {
                    let name = record.name.unwrap_or_else(|| record.id.to_string());
                    match AdminBoundary::new(record.id, name, record.geometry) {
                        Ok(boundary) => session.write_boundary(&boundary)?,
                        Err(err) => {
                            warn!("skipping {layer} record: {err}");
                            rejected += 1;
                        }
                    }
                }
                Layer::BlockGroup => {
                    let population = population_for(counts, &record.id, &mut missing_counts);
                    match BlockGroupUnit::new(record.id, population, record.geometry) {
                        Ok(unit) => session.write_unit(&unit)?,
                        Err(err) => {
                            warn!("skipping block group record: {err}");
                            rejected += 1;
                        }
                    }
                }
            }
            Ok::<(), IngestError>(())
        })?;
        Ok::<(), IngestError>(())
    })?;
    if missing_counts > 0 {
        warn!("{missing_counts} block groups in {scope} had no counts and were loaded with zero population");
    }
    shapes.skipped += rejected;
    shapes.read = shapes.read.saturating_sub(rejected);
    Ok(Loaded {
        mode,
        load,
        shapes,
        missing_counts,
    })
}

fn population_for(counts: Option<&CensusTable>, id: &GeoId, missing: &mut u64) -> Population {
    match counts.and_then(|table| table.get(id)) {
        Some(population) => population,
        None => {
            *missing += 1;
            Population::default()
        }
    }
}
