//! Command-line interface for the gazetteer: serving, ingestion and
//! maintenance of the spatial store.
#![forbid(unsafe_code)]

mod error;
mod ingest;
mod isochrones;
mod serve;
mod simplify;
mod sources;
mod status;

use std::io::Write;
use std::sync::Arc;

use camino::Utf8Path;
use clap::{Parser, Subcommand};
use gazetteer_core::SpatialStore;
use log::{debug, info};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub use error::CliError;
use ingest::IngestArgs;
use isochrones::IsochronesArgs;
use serve::ServeArgs;
use simplify::SimplifyArgs;
use status::StatusArgs;

const ARG_DB: &str = "db";
const ARG_LISTEN: &str = "listen";
const ARG_STATES: &str = "states";
const ARG_LAYER: &str = "layer";
const ARG_TIER: &str = "tier";
const ARG_STATE: &str = "state";
const ARG_COUNTY: &str = "county";
const ARG_SPACING: &str = "spacing-m";
const ARG_DURATIONS: &str = "durations";
const ARG_ROUTING_URL: &str = "routing-url";
const ENV_SERVE_DB: &str = "GAZETTEER_CMDS_SERVE_DB";
const ENV_INGEST_DB: &str = "GAZETTEER_CMDS_INGEST_DB";
const ENV_SIMPLIFY_DB: &str = "GAZETTEER_CMDS_SIMPLIFY_DB";
const ENV_ISOCHRONES_DB: &str = "GAZETTEER_CMDS_ISOCHRONES_DB";
const ENV_ISOCHRONES_STATE: &str = "GAZETTEER_CMDS_ISOCHRONES_STATE";
const ENV_ISOCHRONES_COUNTY: &str = "GAZETTEER_CMDS_ISOCHRONES_COUNTY";
const ENV_STATUS_DB: &str = "GAZETTEER_CMDS_STATUS_DB";

/// Run the gazetteer CLI with the current process arguments and environment.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    init_logging();
    match cli.command {
        Command::Serve(args) => {
            let config = args.into_config()?;
            block_on(async move {
                let shutdown = CancellationToken::new();
                let trigger = shutdown.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("shutdown requested");
                    }
                    trigger.cancel();
                });
                serve::run_serve(config, shutdown).await
            })?;
        }
        Command::Ingest(args) => {
            let config = args.into_config()?;
            block_on(ingest::run_ingest(config))?;
        }
        Command::Simplify(args) => {
            let reports = simplify::run_simplify(args.into_config()?)?;
            let written: u64 = reports.iter().map(|report| report.rows_written).sum();
            info!("simplification wrote {written} rows");
        }
        Command::Isochrones(args) => {
            isochrones::run_isochrones(args.into_config()?)?;
        }
        Command::Status(args) => {
            let summary = status::run_status(args.into_config()?)?;
            let rendered =
                serde_json::to_string_pretty(&summary).map_err(CliError::SerializeOutput)?;
            writeln!(std::io::stdout().lock(), "{rendered}").map_err(CliError::WriteOutput)?;
        }
    }
    Ok(())
}

/// Install the log subscriber; `RUST_LOG` overrides the `info` default.
///
/// Records emitted through the `log` facade by the library crates are
/// forwarded to the same subscriber.
fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        debug!("keeping the installed log subscriber: {err}");
    }
}

fn block_on<F, T>(future: F) -> Result<T, CliError>
where
    F: std::future::Future<Output = Result<T, CliError>>,
{
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?
        .block_on(future)
}

/// Open (creating if needed) the database at `path`.
fn open_store(path: &Utf8Path) -> Result<Arc<SpatialStore>, CliError> {
    gazetteer_fs::ensure_parent_dir(path).map_err(|source| CliError::PrepareDirectory {
        path: path.to_path_buf(),
        source,
    })?;
    SpatialStore::open(path.as_std_path())
        .map(Arc::new)
        .map_err(|source| CliError::OpenStore {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
}

/// Split a comma-separated option into trimmed, non-empty parts.
fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|part| !part.is_empty())
}

#[derive(Debug, Parser)]
#[command(
    name = "gazetteer",
    about = "Census boundary gazetteer: tiles, county contexts and ingestion",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve tiles, boundaries and county contexts over HTTP.
    Serve(ServeArgs),
    /// Load state, county and block-group data into the store.
    Ingest(IngestArgs),
    /// Precompute simplified geometry variants.
    Simplify(SimplifyArgs),
    /// Precompute isochrones over one county.
    Isochrones(IsochronesArgs),
    /// Print store row counts as JSON.
    Status(StatusArgs),
}

#[cfg(test)]
mod tests;
