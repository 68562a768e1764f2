//! Error types emitted by the gazetteer CLI.
//!
//! Keep this error type reasonably small, as every command returns
//! `Result<_, CliError>`; large library errors are boxed behind their own
//! variants.

use std::net::SocketAddr;
use std::sync::Arc;

use camino::Utf8PathBuf;
use gazetteer_core::StoreError;
use gazetteer_data::ingest::IngestError;
use gazetteer_data::isochrone::SeedError;
use gazetteer_data::routing::ProviderBuildError;
use gazetteer_data::simplify::SimplifyError;
use gazetteer_serve::ServeError;
use thiserror::Error;

/// Errors emitted by the gazetteer CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        field: &'static str,
        env: &'static str,
    },
    /// An option was present but could not be used.
    #[error("invalid --{field} value {value:?}: {reason}")]
    InvalidArgument {
        field: &'static str,
        value: String,
        reason: String,
    },
    /// Creating the directory that holds the database failed.
    #[error("failed to prepare directory for {path:?}: {source}")]
    PrepareDirectory {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Opening the database failed.
    #[error("failed to open database {path:?}: {source}")]
    OpenStore {
        path: Utf8PathBuf,
        #[source]
        source: Box<StoreError>,
    },
    /// A store query failed.
    #[error(transparent)]
    Store(Box<StoreError>),
    /// Building the async runtime failed.
    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    /// Building an upstream HTTP client failed.
    #[error("failed to build HTTP client for {target}: {source}")]
    HttpClient {
        target: &'static str,
        #[source]
        source: reqwest::Error,
    },
    /// Constructing the routing client failed.
    #[error("failed to build routing client for {base_url:?}: {source}")]
    BuildRoutingProvider {
        base_url: String,
        #[source]
        source: ProviderBuildError,
    },
    /// The ingestion coordinator could not run.
    #[error("ingestion failed: {0}")]
    Ingest(#[source] Box<IngestError>),
    /// The coordinator finished but some scopes failed.
    #[error("ingestion finished with {failed} failed scope(s)")]
    IngestIncomplete { failed: usize },
    /// Simplification failed.
    #[error("simplification failed: {0}")]
    Simplify(#[source] Box<SimplifyError>),
    /// Isochrone seeding failed.
    #[error("isochrone seeding failed: {0}")]
    Seed(#[source] Box<SeedError>),
    /// Binding the listener failed.
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// The HTTP server stopped with an error.
    #[error("server failed: {0}")]
    Serve(#[source] Box<ServeError>),
    /// Serialising command output failed.
    #[error("failed to serialise output: {0}")]
    SerializeOutput(#[source] serde_json::Error),
    /// Writing command output failed.
    #[error("failed to write output: {0}")]
    WriteOutput(#[source] std::io::Error),
}

impl From<StoreError> for CliError {
    fn from(value: StoreError) -> Self {
        Self::Store(Box::new(value))
    }
}

impl From<IngestError> for CliError {
    fn from(value: IngestError) -> Self {
        Self::Ingest(Box::new(value))
    }
}

impl From<SimplifyError> for CliError {
    fn from(value: SimplifyError) -> Self {
        Self::Simplify(Box::new(value))
    }
}

impl From<SeedError> for CliError {
    fn from(value: SeedError) -> Self {
        Self::Seed(Box::new(value))
    }
}

impl From<ServeError> for CliError {
    fn from(value: ServeError) -> Self {
        Self::Serve(Box::new(value))
    }
}
