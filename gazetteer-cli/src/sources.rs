//! Upstream source settings shared by `serve` and `ingest`.

use std::sync::Arc;

use camino::Utf8PathBuf;
use gazetteer_core::{GeoId, Layer, SpatialStore};
use gazetteer_data::archive::{
    ArchiveCatalog, DEFAULT_ARCHIVE_BASE_URL, DEFAULT_VINTAGE, HttpArchiveSource,
};
use gazetteer_data::census::{HttpCensusApi, HttpCensusConfig};
use gazetteer_data::ingest::{IngestConfig, Ingestor};

use crate::{ARG_STATES, CliError, split_list};

/// Where boundary archives and counts come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SourceSettings {
    /// Archive root URL.
    pub(crate) archive_base_url: String,
    /// TIGER vintage.
    pub(crate) vintage: u16,
    /// Statistical API key.
    pub(crate) census_api_key: Option<String>,
    /// Block-group states; `None` loads every loaded state.
    pub(crate) states: Option<Vec<GeoId>>,
    /// Download scratch directory.
    pub(crate) scratch_dir: Option<Utf8PathBuf>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            archive_base_url: DEFAULT_ARCHIVE_BASE_URL.to_owned(),
            vintage: DEFAULT_VINTAGE,
            census_api_key: None,
            states: None,
            scratch_dir: None,
        }
    }
}

impl SourceSettings {
    /// Ingestor writing to `store` through the HTTP adapters.
    pub(crate) fn ingestor(&self, store: Arc<SpatialStore>) -> Result<Ingestor, CliError> {
        let archives = HttpArchiveSource::new().map_err(|source| CliError::HttpClient {
            target: "boundary archives",
            source,
        })?;
        let counts = HttpCensusApi::with_config(
            HttpCensusConfig::default().with_api_key(self.census_api_key.clone()),
        )
        .map_err(|source| CliError::HttpClient {
            target: "population counts",
            source,
        })?;
        let mut config = IngestConfig::default()
            .with_catalog(ArchiveCatalog::new(&self.archive_base_url, self.vintage));
        if let Some(states) = &self.states {
            config = config.with_states(states.iter().cloned());
        }
        if let Some(dir) = &self.scratch_dir {
            config = config.with_scratch_dir(dir.clone());
        }
        Ok(Ingestor::new(
            store,
            Arc::new(archives),
            Arc::new(counts),
            config,
        ))
    }
}

/// Parse `06,32` into state identifiers.
pub(crate) fn parse_states(raw: &str) -> Result<Vec<GeoId>, CliError> {
    let states = split_list(raw)
        .map(|part| {
            GeoId::for_layer(part, Layer::State).map_err(|err| CliError::InvalidArgument {
                field: ARG_STATES,
                value: raw.to_owned(),
                reason: err.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if states.is_empty() {
        return Err(CliError::InvalidArgument {
            field: ARG_STATES,
            value: raw.to_owned(),
            reason: "no state identifiers given".to_owned(),
        });
    }
    Ok(states)
}
