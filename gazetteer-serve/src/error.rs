//! HTTP error type and its [`IntoResponse`] mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gazetteer_core::{GeoIdError, StoreError};
use log::error;
use serde_json::json;
use thiserror::Error;

use crate::context::ContextError;
use crate::tiles::TileError;

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The request was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// A store query failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Rendering a tile failed.
    #[error(transparent)]
    Tile(#[from] TileError),
    /// Building a county context failed.
    #[error(transparent)]
    Context(ContextError),
    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    /// A response body could not be serialised.
    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
    /// Binding or running the listener failed.
    #[error("server I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ContextError> for ServeError {
    fn from(value: ContextError) -> Self {
        match value {
            ContextError::InvalidRegion { .. } => Self::BadRequest(value.to_string()),
            ContextError::UnknownRegion { .. } => Self::NotFound(value.to_string()),
            other => Self::Context(other),
        }
    }
}

impl From<GeoIdError> for ServeError {
    fn from(value: GeoIdError) -> Self {
        Self::BadRequest(value.to_string())
    }
}

impl ServeError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Store(_)
            | Self::Tile(_)
            | Self::Context(_)
            | Self::Task(_)
            | Self::Encode(_)
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
