//! `status` command: summarise what the store holds.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use clap::Parser;
use gazetteer_core::{DownloadRecord, IsochroneRunRecord};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{ARG_DB, CliError, ENV_STATUS_DB, open_store};

/// CLI arguments for the `status` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(name = "status", about = "Print store row counts as JSON")]
#[ortho_config(prefix = "GAZETTEER")]
pub(crate) struct StatusArgs {
    /// Path to the gazetteer SQLite database.
    #[arg(long = ARG_DB, value_name = "path")]
    #[serde(default)]
    pub(crate) db: Option<Utf8PathBuf>,
}

impl StatusArgs {
    pub(crate) fn into_config(self) -> Result<StatusCommandConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        StatusCommandConfig::try_from(merged)
    }
}

/// Resolved `status` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatusCommandConfig {
    pub(crate) db: Utf8PathBuf,
}

impl TryFrom<StatusArgs> for StatusCommandConfig {
    type Error = CliError;

    fn try_from(args: StatusArgs) -> Result<Self, Self::Error> {
        let db = args.db.ok_or(CliError::MissingArgument {
            field: ARG_DB,
            env: ENV_STATUS_DB,
        })?;
        Ok(Self { db })
    }
}

/// Store summary printed by `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct StatusSummary {
    /// Rows per layer.
    pub(crate) layers: BTreeMap<&'static str, u64>,
    /// Simplified rows keyed `layer/tier`.
    pub(crate) variants: BTreeMap<String, u64>,
    /// Stored isochrone polygons.
    pub(crate) isochrones: u64,
    /// Persisted tiles.
    pub(crate) cached_tiles: u64,
    /// Archive downloads, oldest first.
    pub(crate) downloads: Vec<DownloadRecord>,
    /// Isochrone seeding runs, oldest first.
    pub(crate) isochrone_runs: Vec<IsochroneRunRecord>,
}

pub(crate) fn run_status(config: StatusCommandConfig) -> Result<StatusSummary, CliError> {
    let store = open_store(&config.db)?;
    let status = store.status()?;
    Ok(StatusSummary {
        layers: status
            .layers
            .iter()
            .map(|(layer, rows)| (layer.as_str(), *rows))
            .collect(),
        variants: status
            .variants
            .iter()
            .map(|(layer, tier, rows)| (format!("{layer}/{tier}"), *rows))
            .collect(),
        isochrones: status.isochrones,
        cached_tiles: status.cached_tiles,
        downloads: store.downloads()?,
        isochrone_runs: store.isochrone_runs()?,
    })
}
