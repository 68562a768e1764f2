//! `simplify` command: fill in missing simplified geometry variants.

use camino::Utf8PathBuf;
use clap::Parser;
use gazetteer_core::{DEFAULT_BATCH_SIZE, Layer, ToleranceTier};
use gazetteer_data::simplify::{SimplifyReport, ensure_all_simplified, ensure_simplified};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{ARG_DB, ARG_LAYER, ARG_TIER, CliError, ENV_SIMPLIFY_DB, open_store};

/// CLI arguments for the `simplify` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "simplify",
    long_about = "Precompute simplified geometry for rows that lack it. With no \
                 options every layer is processed at its default tiers; rows \
                 that already have a variant are left alone.",
    about = "Precompute simplified geometry variants"
)]
#[ortho_config(prefix = "GAZETTEER")]
pub(crate) struct SimplifyArgs {
    /// Path to the gazetteer SQLite database.
    #[arg(long = ARG_DB, value_name = "path")]
    #[serde(default)]
    pub(crate) db: Option<Utf8PathBuf>,
    /// Layer to process: state, county or block_group.
    #[arg(long = ARG_LAYER, value_name = "layer")]
    #[serde(default)]
    pub(crate) layer: Option<String>,
    /// Tier to process: detail, fine, medium or coarse.
    #[arg(long = ARG_TIER, value_name = "tier")]
    #[serde(default)]
    pub(crate) tier: Option<String>,
    /// Rows simplified per transaction.
    #[arg(long, value_name = "rows")]
    #[serde(default)]
    pub(crate) batch_size: Option<usize>,
}

impl SimplifyArgs {
    pub(crate) fn into_config(self) -> Result<SimplifyCommandConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        SimplifyCommandConfig::try_from(merged)
    }
}

/// Which variants to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SimplifyScope {
    /// Every layer at its default tiers.
    All,
    /// One layer at its default tiers.
    Layer(Layer),
    /// One layer at one tier.
    Variant(Layer, ToleranceTier),
}

/// Resolved `simplify` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SimplifyCommandConfig {
    pub(crate) db: Utf8PathBuf,
    pub(crate) scope: SimplifyScope,
    pub(crate) batch_size: usize,
}

impl TryFrom<SimplifyArgs> for SimplifyCommandConfig {
    type Error = CliError;

    fn try_from(args: SimplifyArgs) -> Result<Self, Self::Error> {
        let db = args.db.ok_or(CliError::MissingArgument {
            field: ARG_DB,
            env: ENV_SIMPLIFY_DB,
        })?;
        let layer = args
            .layer
            .map(|raw| {
                raw.parse::<Layer>().map_err(|err| CliError::InvalidArgument {
                    field: ARG_LAYER,
                    value: raw.clone(),
                    reason: err.to_string(),
                })
            })
            .transpose()?;
        let tier = args
            .tier
            .map(|raw| {
                raw.parse::<ToleranceTier>()
                    .map_err(|err| CliError::InvalidArgument {
                        field: ARG_TIER,
                        value: raw.clone(),
                        reason: err.to_string(),
                    })
            })
            .transpose()?;
        let scope = match (layer, tier) {
            (None, None) => SimplifyScope::All,
            (Some(layer), None) => SimplifyScope::Layer(layer),
            (Some(layer), Some(tier)) => SimplifyScope::Variant(layer, tier),
            (None, Some(tier)) => {
                return Err(CliError::InvalidArgument {
                    field: ARG_TIER,
                    value: tier.to_string(),
                    reason: "--tier needs --layer".to_owned(),
                });
            }
        };
        Ok(Self {
            db,
            scope,
            batch_size: args.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1),
        })
    }
}

/// Build the missing variants in scope.
pub(crate) fn run_simplify(
    config: SimplifyCommandConfig,
) -> Result<Vec<SimplifyReport>, CliError> {
    let store = open_store(&config.db)?;
    let reports = match config.scope {
        SimplifyScope::All => ensure_all_simplified(&store, config.batch_size)?,
        SimplifyScope::Layer(layer) => ToleranceTier::defaults_for(layer)
            .iter()
            .map(|&tier| ensure_simplified(&store, layer, tier, config.batch_size))
            .collect::<Result<Vec<_>, _>>()?,
        SimplifyScope::Variant(layer, tier) => {
            vec![ensure_simplified(&store, layer, tier, config.batch_size)?]
        }
    };
    Ok(reports)
}
