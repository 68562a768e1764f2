//! Boundary and population ingestion.
//!
//! [`Ingestor::ingest_layer`] runs one download, parse and load cycle for a
//! layer and scope, retrying the whole cycle with exponential backoff.
//! [`Ingestor::run`] is the startup coordinator: it checks the store against
//! row-count thresholds and ingests states, counties and then each state's
//! block groups, carrying on past failures and reporting them at the end.

mod config;
mod coordinator;
mod layer;

use std::io;
use std::path::PathBuf;

use gazetteer_core::{Layer, StoreError};
use thiserror::Error;

use crate::archive::{CatalogError, TransportError};
use crate::census::CensusError;
use crate::tiger::ShapefileError;

pub use config::{IngestConfig, MAX_STATE_FIPS, RetryPolicy, SeedThresholds};
pub use coordinator::{IngestFailure, IngestReport, SeedPlan};
pub use layer::{Ingestor, LayerReport};

/// Errors raised while ingesting one layer and scope.
#[derive(Debug, Error)]
pub enum IngestError {
    /// No archive exists for the layer and scope.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// Downloading the archive failed.
    #[error("archive download failed: {source}")]
    Download {
        /// Transport failure.
        #[source]
        source: TransportError,
    },
    /// Fetching population counts failed.
    #[error(transparent)]
    Census(#[from] CensusError),
    /// The archive could not be unpacked or read.
    #[error(transparent)]
    Shapefile(#[from] ShapefileError),
    /// The store rejected the load.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The scratch file for the download could not be created.
    #[error("failed to prepare scratch file under {path}: {source}")]
    Scratch {
        /// Scratch directory.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The blocking load task panicked or was cancelled.
    #[error("load task failed: {source}")]
    Task {
        /// Join failure.
        #[source]
        source: tokio::task::JoinError,
    },
    /// Every attempt failed.
    #[error("{layer} ingestion for {scope} failed after {attempts} attempts: {source}")]
    Exhausted {
        /// Layer being ingested.
        layer: Layer,
        /// Scope being ingested.
        scope: String,
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        source: Box<IngestError>,
    },
}

impl IngestError {
    /// Whether another attempt of the whole cycle could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Download { source } => source.is_transient(),
            Self::Census(CensusError::Transport { source, .. }) => source.is_transient(),
            Self::Shapefile(_) => true,
            Self::Catalog(_)
            | Self::Census(_)
            | Self::Store(_)
            | Self::Scratch { .. }
            | Self::Task { .. }
            | Self::Exhausted { .. } => false,
        }
    }
}
