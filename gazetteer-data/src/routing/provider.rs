//! HTTP [`IsochroneProvider`] for Valhalla-compatible routing engines.

use std::time::Duration;

use gazetteer_core::{
    IsochroneContour, IsochroneError, IsochroneProvider, MAX_CONTOURS_PER_REQUEST, RoutingParams,
};
use geo::Coord;
use log::debug;
use reqwest::Client;
use thiserror::Error;
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};

use super::valhalla::{ContourRequest, IsochroneRequest, IsochroneResponse, Location};

/// Error type for [`HttpIsochroneProvider`] construction failures.
#[derive(Debug, Error)]
pub enum ProviderBuildError {
    /// Failed to build the HTTP client.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
    /// Failed to build the Tokio runtime.
    #[error("failed to build Tokio runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Default user agent for routing requests.
pub const DEFAULT_USER_AGENT: &str = "gazetteer-routing/0.1";

/// Default routing endpoint.
pub const DEFAULT_ROUTING_URL: &str = "http://localhost:8002";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration for [`HttpIsochroneProvider`].
#[derive(Debug, Clone)]
pub struct HttpIsochroneProviderConfig {
    /// Base URL of the routing engine.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// User agent string.
    pub user_agent: String,
}

impl Default for HttpIsochroneProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ROUTING_URL.to_owned(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl HttpIsochroneProviderConfig {
    /// Configuration for the engine at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the user agent string.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Routing-engine client implementing the synchronous
/// [`IsochroneProvider`] trait.
///
/// Outside any Tokio runtime, and inside a `current_thread` runtime, calls
/// block on a runtime the provider owns. Inside a multi-threaded runtime the
/// provider blocks on the ambient handle via
/// [`tokio::task::block_in_place`].
pub struct HttpIsochroneProvider {
    client: Client,
    config: HttpIsochroneProviderConfig,
    runtime: Runtime,
}

impl std::fmt::Debug for HttpIsochroneProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIsochroneProvider")
            .field("client", &self.client)
            .field("config", &self.config)
            .field("runtime", &"<tokio::runtime::Runtime>")
            .finish()
    }
}

impl HttpIsochroneProvider {
    /// Create a provider for the engine at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ProviderBuildError> {
        Self::with_config(HttpIsochroneProviderConfig::new(base_url))
    }

    /// Create a provider with explicit configuration.
    pub fn with_config(config: HttpIsochroneProviderConfig) -> Result<Self, ProviderBuildError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.timeout)
            .timeout(config.timeout)
            .build()
            .map_err(ProviderBuildError::HttpClient)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ProviderBuildError::Runtime)?;
        Ok(Self {
            client,
            config,
            runtime,
        })
    }

    /// Endpoint the provider posts to.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}/isochrone", self.config.base_url.trim_end_matches('/'))
    }

    async fn fetch_async(
        &self,
        origin: Coord<f64>,
        durations: &[u32],
        params: &RoutingParams,
    ) -> Result<Vec<IsochroneContour>, IsochroneError> {
        let url = self.endpoint();
        let body = IsochroneRequest {
            locations: [Location {
                lat: origin.y,
                lon: origin.x,
            }],
            costing: &params.costing,
            contours: durations
                .iter()
                .map(|&time| ContourRequest { time })
                .collect(),
            polygons: params.polygons,
            denoise: params.denoise,
            generalize: params.generalize,
        };
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| self.convert_reqwest_error(&err, &url))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| self.convert_reqwest_error(&err, &url))?;
        let parsed = serde_json::from_slice::<IsochroneResponse>(&bytes);
        if !status.is_success() {
            // Engines report their own error code in the body of a 4xx.
            return Err(match parsed {
                Ok(body) if !body.is_ok() => service_error(body),
                _ => IsochroneError::HttpError {
                    url,
                    status: status.as_u16(),
                    message: String::from_utf8_lossy(&bytes).chars().take(200).collect(),
                },
            });
        }
        let parsed = parsed.map_err(|err| IsochroneError::ParseError {
            message: err.to_string(),
        })?;
        debug!("{url} returned {} features", parsed.features.len());
        convert_response(parsed, durations)
    }

    fn convert_reqwest_error(&self, error: &reqwest::Error, url: &str) -> IsochroneError {
        if error.is_timeout() {
            return IsochroneError::Timeout {
                url: url.to_owned(),
                timeout_secs: self.config.timeout.as_secs(),
            };
        }

        if let Some(status) = error.status() {
            return IsochroneError::HttpError {
                url: url.to_owned(),
                status: status.as_u16(),
                message: error.to_string(),
            };
        }

        IsochroneError::NetworkError {
            url: url.to_owned(),
            message: error.to_string(),
        }
    }
}

fn service_error(response: IsochroneResponse) -> IsochroneError {
    IsochroneError::ServiceError {
        code: response
            .error_code
            .map_or_else(|| "unknown".to_owned(), |code| code.to_string()),
        message: response.error.unwrap_or_default(),
    }
}

/// Keep polygon contours for the requested durations, one per duration.
fn convert_response(
    response: IsochroneResponse,
    durations: &[u32],
) -> Result<Vec<IsochroneContour>, IsochroneError> {
    if !response.is_ok() {
        return Err(service_error(response));
    }
    let mut contours: Vec<IsochroneContour> = Vec::new();
    for feature in response.features {
        let Some(minutes) = feature.properties.contour.and_then(whole_minutes) else {
            continue;
        };
        if !durations.contains(&minutes) || contours.iter().any(|c| c.minutes == minutes) {
            continue;
        }
        if let Some(polygon) = feature
            .geometry
            .as_ref()
            .and_then(|geometry| geometry.to_multi_polygon())
        {
            contours.push(IsochroneContour { minutes, polygon });
        }
    }
    if contours.is_empty() {
        return Err(IsochroneError::EmptyResponse);
    }
    contours.sort_by_key(|contour| contour.minutes);
    Ok(contours)
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "range checked before the cast"
)]
fn whole_minutes(value: f64) -> Option<u32> {
    let rounded = value.round();
    (rounded.is_finite() && rounded > 0.0 && rounded <= f64::from(u32::MAX))
        .then(|| rounded as u32)
}

pub(super) fn validate_durations(durations: &[u32]) -> Result<(), IsochroneError> {
    if durations.is_empty() {
        return Err(IsochroneError::EmptyInput);
    }
    if durations.len() > MAX_CONTOURS_PER_REQUEST {
        return Err(IsochroneError::TooManyContours {
            requested: durations.len(),
        });
    }
    Ok(())
}

impl IsochroneProvider for HttpIsochroneProvider {
    fn isochrones(
        &self,
        origin: Coord<f64>,
        durations: &[u32],
        params: &RoutingParams,
    ) -> Result<Vec<IsochroneContour>, IsochroneError> {
        validate_durations(durations)?;

        let future = self.fetch_async(origin, durations, params);
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| handle.block_on(future))
            }
            _ => self.runtime.block_on(future),
        }
    }
}
