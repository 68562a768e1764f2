//! `isochrones` command: precompute drive-time polygons over one county.

use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use gazetteer_core::RoutingParams;
use gazetteer_data::isochrone::{SeedReport, SeedRequest, seed_county};
use gazetteer_data::routing::{
    DEFAULT_ROUTING_URL, HttpIsochroneProvider, HttpIsochroneProviderConfig,
};
use log::info;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_COUNTY, ARG_DB, ARG_DURATIONS, ARG_ROUTING_URL, ARG_SPACING, ARG_STATE, CliError,
    ENV_ISOCHRONES_COUNTY, ENV_ISOCHRONES_DB, ENV_ISOCHRONES_STATE, open_store, split_list,
};

const DEFAULT_DURATIONS: &str = "10,20,30";
const DEFAULT_SPACING_M: f64 = 5_000.0;
const DEFAULT_ROUTING_TIMEOUT: Duration = Duration::from_secs(60);

/// CLI arguments for the `isochrones` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "isochrones",
    long_about = "Sample a county on a square grid and store drive-time \
                 polygons for each grid point from a Valhalla-compatible \
                 routing engine. Points already cached for the same routing \
                 parameters are skipped, so interrupted runs can be resumed.",
    about = "Precompute isochrones for a county"
)]
#[ortho_config(prefix = "GAZETTEER")]
pub(crate) struct IsochronesArgs {
    /// Path to the gazetteer SQLite database.
    #[arg(long = ARG_DB, value_name = "path")]
    #[serde(default)]
    pub(crate) db: Option<Utf8PathBuf>,
    /// State identifier or name.
    #[arg(long = ARG_STATE, value_name = "state")]
    #[serde(default)]
    pub(crate) state: Option<String>,
    /// County name.
    #[arg(long = ARG_COUNTY, value_name = "name")]
    #[serde(default)]
    pub(crate) county: Option<String>,
    /// Grid spacing in metres.
    #[arg(long = ARG_SPACING, value_name = "metres")]
    #[serde(default)]
    pub(crate) spacing_m: Option<f64>,
    /// Comma-separated durations in minutes.
    #[arg(long = ARG_DURATIONS, value_name = "minutes")]
    #[serde(default)]
    pub(crate) durations: Option<String>,
    /// Routing costing profile.
    #[arg(long, value_name = "profile")]
    #[serde(default)]
    pub(crate) costing: Option<String>,
    /// Routing engine root URL.
    #[arg(long = ARG_ROUTING_URL, value_name = "url")]
    #[serde(default)]
    pub(crate) routing_url: Option<String>,
    /// Per-request routing timeout in seconds.
    #[arg(long, value_name = "secs")]
    #[serde(default)]
    pub(crate) timeout_secs: Option<u64>,
}

impl IsochronesArgs {
    pub(crate) fn into_config(self) -> Result<IsochronesCommandConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        IsochronesCommandConfig::try_from(merged)
    }
}

/// Resolved `isochrones` command configuration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IsochronesCommandConfig {
    pub(crate) db: Utf8PathBuf,
    pub(crate) state: String,
    pub(crate) county: String,
    pub(crate) spacing_m: f64,
    pub(crate) params: RoutingParams,
    pub(crate) routing_url: String,
    pub(crate) timeout: Duration,
}

impl TryFrom<IsochronesArgs> for IsochronesCommandConfig {
    type Error = CliError;

    fn try_from(args: IsochronesArgs) -> Result<Self, Self::Error> {
        let db = args.db.ok_or(CliError::MissingArgument {
            field: ARG_DB,
            env: ENV_ISOCHRONES_DB,
        })?;
        let state = args.state.ok_or(CliError::MissingArgument {
            field: ARG_STATE,
            env: ENV_ISOCHRONES_STATE,
        })?;
        let county = args.county.ok_or(CliError::MissingArgument {
            field: ARG_COUNTY,
            env: ENV_ISOCHRONES_COUNTY,
        })?;
        let spacing_m = args.spacing_m.unwrap_or(DEFAULT_SPACING_M);
        if !(spacing_m.is_finite() && spacing_m > 0.0) {
            return Err(CliError::InvalidArgument {
                field: ARG_SPACING,
                value: spacing_m.to_string(),
                reason: "must be a positive number of metres".to_owned(),
            });
        }
        let raw_durations = args
            .durations
            .unwrap_or_else(|| DEFAULT_DURATIONS.to_owned());
        let mut params = RoutingParams::with_durations(parse_durations(&raw_durations)?);
        if let Some(costing) = args.costing {
            params = params.with_costing(costing);
        }
        Ok(Self {
            db,
            state,
            county,
            spacing_m,
            params,
            routing_url: args
                .routing_url
                .unwrap_or_else(|| DEFAULT_ROUTING_URL.to_owned()),
            timeout: args
                .timeout_secs
                .map_or(DEFAULT_ROUTING_TIMEOUT, Duration::from_secs),
        })
    }
}

/// Parse `10,20,30` into minutes.
pub(crate) fn parse_durations(raw: &str) -> Result<Vec<u32>, CliError> {
    let invalid = |reason: String| CliError::InvalidArgument {
        field: ARG_DURATIONS,
        value: raw.to_owned(),
        reason,
    };
    let minutes = split_list(raw)
        .map(|part| {
            part.parse::<u32>()
                .map_err(|err| invalid(format!("{part:?}: {err}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if minutes.is_empty() || minutes.contains(&0) {
        return Err(invalid("expected positive minutes such as 10,20,30".to_owned()));
    }
    Ok(minutes)
}

/// Seed the configured county and log the outcome.
pub(crate) fn run_isochrones(config: IsochronesCommandConfig) -> Result<SeedReport, CliError> {
    let store = open_store(&config.db)?;
    let provider = HttpIsochroneProvider::with_config(
        HttpIsochroneProviderConfig::new(config.routing_url.clone()).with_timeout(config.timeout),
    )
    .map_err(|source| CliError::BuildRoutingProvider {
        base_url: config.routing_url.clone(),
        source,
    })?;
    let request = SeedRequest::new(config.state, config.county)
        .with_spacing(config.spacing_m)
        .with_params(config.params)
        .with_endpoint(provider.endpoint());
    let report = seed_county(&store, &provider, &request)?;
    info!(
        "run {} for {}: {} points, {} requests, {} failures, {} inserted, {} skipped",
        report.run_id,
        report.county,
        report.grid_points,
        report.requests,
        report.failures,
        report.inserted,
        report.skipped
    );
    if let Some(latency) = &report.latency {
        info!(
            "routing latency min {} ms, mean {} ms, p95 {} ms, max {} ms",
            latency.min_ms, latency.mean_ms, latency.p95_ms, latency.max_ms
        );
    }
    Ok(report)
}
