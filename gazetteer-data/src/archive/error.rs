//! Transport errors shared by the HTTP adapters.

use std::io;

use thiserror::Error;

/// Failures raised while fetching bytes from an upstream service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The server returned an HTTP error status.
    #[error("request to {url} failed with status {status}: {message}")]
    Http {
        /// Fully qualified request URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Short error description.
        message: String,
    },
    /// The request failed before a response arrived, or mid-body.
    #[error("network error contacting {url}: {source}")]
    Network {
        /// Fully qualified request URL.
        url: String,
        /// I/O error reported by the transport.
        #[source]
        source: io::Error,
    },
    /// The server kept answering with a challenge page instead of the archive.
    #[error(
        "{url} returned a non-archive response twice (content type {content_type:?}, \
         length {content_length:?})"
    )]
    Interstitial {
        /// Fully qualified request URL.
        url: String,
        /// Content type of the second response.
        content_type: Option<String>,
        /// Declared length of the second response.
        content_length: Option<u64>,
    },
    /// Writing the body into the sink failed.
    #[error("failed to write body of {url}: {source}")]
    Sink {
        /// Fully qualified request URL.
        url: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    /// Whether retrying the same request could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Network { .. } | Self::Interstitial { .. } => true,
            Self::Sink { .. } => false,
        }
    }
}

/// Map a `reqwest` failure onto [`TransportError`].
pub(crate) fn convert_reqwest_error(error: reqwest::Error, url: &str) -> TransportError {
    if let Some(status) = error.status() {
        return TransportError::Http {
            url: url.to_owned(),
            status: status.as_u16(),
            message: error.to_string(),
        };
    }

    let kind = if error.is_timeout() {
        io::ErrorKind::TimedOut
    } else {
        io::ErrorKind::Other
    };
    TransportError::Network {
        url: url.to_owned(),
        source: io::Error::new(kind, error),
    }
}
