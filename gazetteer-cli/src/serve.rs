//! `serve` command: run the HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use gazetteer_serve::{AppState, ContextConfig, SeedLauncher, ServeConfig, TileServiceConfig};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::sources::{SourceSettings, parse_states};
use crate::{ARG_DB, ARG_LISTEN, ARG_STATES, CliError, ENV_SERVE_DB, open_store};

const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// CLI arguments for the `serve` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "serve",
    long_about = "Serve vector tiles, boundary GeoJSON and county contexts \
                 from a gazetteer database. POST /admin/seed starts the \
                 ingestion coordinator in the background using the source \
                 options below.",
    about = "Serve tiles, boundaries and county contexts"
)]
#[ortho_config(prefix = "GAZETTEER")]
pub(crate) struct ServeArgs {
    /// Path to the gazetteer SQLite database.
    #[arg(long = ARG_DB, value_name = "path")]
    #[serde(default)]
    pub(crate) db: Option<Utf8PathBuf>,
    /// Socket address to listen on.
    #[arg(long = ARG_LISTEN, value_name = "addr")]
    #[serde(default)]
    pub(crate) listen: Option<String>,
    /// First zoom level drawing county outlines.
    #[arg(long, value_name = "zoom")]
    #[serde(default)]
    pub(crate) county_min_zoom: Option<u8>,
    /// Tiles kept in the in-process cache.
    #[arg(long, value_name = "entries")]
    #[serde(default)]
    pub(crate) tile_cache_entries: Option<usize>,
    /// Lite context timeout in seconds.
    #[arg(long, value_name = "secs")]
    #[serde(default)]
    pub(crate) lite_timeout_secs: Option<u64>,
    /// Full context timeout in seconds.
    #[arg(long, value_name = "secs")]
    #[serde(default)]
    pub(crate) full_timeout_secs: Option<u64>,
    /// Lite context buffer in metres.
    #[arg(long, value_name = "metres")]
    #[serde(default)]
    pub(crate) lite_buffer_m: Option<f64>,
    /// Archive root URL used by background seeding.
    #[arg(long, value_name = "url")]
    #[serde(default)]
    pub(crate) archive_base_url: Option<String>,
    /// TIGER vintage used by background seeding.
    #[arg(long, value_name = "year")]
    #[serde(default)]
    pub(crate) vintage: Option<u16>,
    /// Statistical API key used by background seeding.
    #[arg(long, value_name = "key")]
    #[serde(default)]
    pub(crate) census_api_key: Option<String>,
    /// Comma-separated state identifiers seeded with block groups.
    #[arg(long = ARG_STATES, value_name = "ids")]
    #[serde(default)]
    pub(crate) states: Option<String>,
}

impl ServeArgs {
    pub(crate) fn into_config(self) -> Result<ServeCommandConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ServeCommandConfig::try_from(merged)
    }
}

/// Resolved `serve` command configuration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ServeCommandConfig {
    pub(crate) db: Utf8PathBuf,
    pub(crate) listen: SocketAddr,
    pub(crate) serve: ServeConfig,
    pub(crate) sources: SourceSettings,
}

impl TryFrom<ServeArgs> for ServeCommandConfig {
    type Error = CliError;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        let db = args.db.ok_or(CliError::MissingArgument {
            field: ARG_DB,
            env: ENV_SERVE_DB,
        })?;
        let raw_listen = args.listen.unwrap_or_else(|| DEFAULT_LISTEN.to_owned());
        let listen = raw_listen
            .parse()
            .map_err(|err: std::net::AddrParseError| CliError::InvalidArgument {
                field: ARG_LISTEN,
                value: raw_listen.clone(),
                reason: err.to_string(),
            })?;

        let mut tiles = TileServiceConfig::default();
        if let Some(zoom) = args.county_min_zoom {
            tiles = tiles.with_county_min_zoom(zoom);
        }
        if let Some(entries) = args.tile_cache_entries {
            tiles = tiles.with_memory_capacity(entries);
        }

        let defaults = ContextConfig::default();
        let mut context = defaults.clone().with_timeouts(
            args.lite_timeout_secs
                .map_or(defaults.lite_timeout, Duration::from_secs),
            args.full_timeout_secs
                .map_or(defaults.full_timeout, Duration::from_secs),
        );
        if let Some(buffer) = args.lite_buffer_m {
            if !(buffer.is_finite() && buffer > 0.0) {
                return Err(CliError::InvalidArgument {
                    field: "lite-buffer-m",
                    value: buffer.to_string(),
                    reason: "must be a positive number of metres".to_owned(),
                });
            }
            context.lite_buffer_m = buffer;
        }

        let mut sources = SourceSettings {
            census_api_key: args.census_api_key,
            states: args.states.as_deref().map(parse_states).transpose()?,
            ..SourceSettings::default()
        };
        if let Some(url) = args.archive_base_url {
            sources.archive_base_url = url;
        }
        if let Some(vintage) = args.vintage {
            sources.vintage = vintage;
        }

        Ok(Self {
            db,
            listen,
            serve: ServeConfig { tiles, context },
            sources,
        })
    }
}

/// Serve until `shutdown` is cancelled.
pub(crate) async fn run_serve(
    config: ServeCommandConfig,
    shutdown: CancellationToken,
) -> Result<(), CliError> {
    let store = open_store(&config.db)?;
    let ingestor = config.sources.ingestor(Arc::clone(&store))?;
    let seeder = Arc::new(SeedLauncher::new(Arc::new(ingestor)));
    let state = AppState::new(store, seeder, config.serve);
    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|source| CliError::Bind {
            addr: config.listen,
            source,
        })?;
    gazetteer_serve::serve(listener, state, shutdown).await?;
    Ok(())
}
