//! `ingest` command: run the startup coordinator once.

use camino::Utf8PathBuf;
use clap::Parser;
use gazetteer_data::ingest::IngestReport;
use log::{info, warn};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::sources::{SourceSettings, parse_states};
use crate::{ARG_DB, ARG_STATES, CliError, ENV_INGEST_DB, open_store};

/// CLI arguments for the `ingest` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "ingest",
    long_about = "Load state and county outlines when the store is below its \
                 row thresholds, then block groups with population counts for \
                 every state lacking them. Failed scopes are reported at the \
                 end and can be retried by running the command again.",
    about = "Load boundaries and population counts"
)]
#[ortho_config(prefix = "GAZETTEER")]
pub(crate) struct IngestArgs {
    /// Path to the gazetteer SQLite database.
    #[arg(long = ARG_DB, value_name = "path")]
    #[serde(default)]
    pub(crate) db: Option<Utf8PathBuf>,
    /// Archive root URL.
    #[arg(long, value_name = "url")]
    #[serde(default)]
    pub(crate) archive_base_url: Option<String>,
    /// TIGER vintage.
    #[arg(long, value_name = "year")]
    #[serde(default)]
    pub(crate) vintage: Option<u16>,
    /// Statistical API key.
    #[arg(long, value_name = "key")]
    #[serde(default)]
    pub(crate) census_api_key: Option<String>,
    /// Comma-separated state identifiers to load block groups for.
    #[arg(long = ARG_STATES, value_name = "ids")]
    #[serde(default)]
    pub(crate) states: Option<String>,
    /// Directory for downloads and unpacked archives.
    #[arg(long, value_name = "dir")]
    #[serde(default)]
    pub(crate) scratch_dir: Option<Utf8PathBuf>,
}

impl IngestArgs {
    pub(crate) fn into_config(self) -> Result<IngestCommandConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        IngestCommandConfig::try_from(merged)
    }
}

/// Resolved `ingest` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IngestCommandConfig {
    pub(crate) db: Utf8PathBuf,
    pub(crate) sources: SourceSettings,
}

impl TryFrom<IngestArgs> for IngestCommandConfig {
    type Error = CliError;

    fn try_from(args: IngestArgs) -> Result<Self, Self::Error> {
        let db = args.db.ok_or(CliError::MissingArgument {
            field: ARG_DB,
            env: ENV_INGEST_DB,
        })?;
        let defaults = SourceSettings::default();
        Ok(Self {
            db,
            sources: SourceSettings {
                archive_base_url: args.archive_base_url.unwrap_or(defaults.archive_base_url),
                vintage: args.vintage.unwrap_or(defaults.vintage),
                census_api_key: args.census_api_key,
                states: args.states.as_deref().map(parse_states).transpose()?,
                scratch_dir: args.scratch_dir,
            },
        })
    }
}

/// Run the coordinator and fail when any scope failed.
pub(crate) async fn run_ingest(config: IngestCommandConfig) -> Result<IngestReport, CliError> {
    let store = open_store(&config.db)?;
    let ingestor = config.sources.ingestor(store)?;
    let report = ingestor.run().await?;
    for failure in &report.failures {
        warn!(
            "{} {} was not loaded: {}",
            failure.layer, failure.scope, failure.message
        );
    }
    if !report.is_success() {
        return Err(CliError::IngestIncomplete {
            failed: report.failures.len(),
        });
    }
    info!(
        "ingested {} scope(s); {} already loaded",
        report.completed.len(),
        report.skipped.len()
    );
    Ok(report)
}
