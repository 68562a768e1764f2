use std::time::Duration;

use async_trait::async_trait;
use gazetteer_core::GeoId;
use log::debug;
use reqwest::Client;
use url::Url;

use super::{ADULT_COLUMN, CensusError, CensusTable, CountsSource, TOTAL_COLUMN, parse_counts};
use crate::archive::{DEFAULT_USER_AGENT, TransportError, convert_reqwest_error};

/// Default statistical API endpoint.
pub const DEFAULT_CENSUS_BASE_URL: &str = "https://api.census.gov/data";

const DEFAULT_DATASET: &str = "2020/dec/pl";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Configuration for [`HttpCensusApi`].
#[derive(Debug, Clone)]
pub struct HttpCensusConfig {
    /// API root without a trailing slash.
    pub base_url: String,
    /// Dataset path below the root, for example `2020/dec/pl`.
    pub dataset: String,
    /// Optional API key; anonymous requests are rate limited.
    pub api_key: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
    /// User agent string.
    pub user_agent: String,
}

impl Default for HttpCensusConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CENSUS_BASE_URL.to_owned(),
            dataset: DEFAULT_DATASET.to_owned(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl HttpCensusConfig {
    /// Set the API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    /// Set the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Query URL for every block group in `state`.
    ///
    /// ```
    /// use gazetteer_data::census::HttpCensusConfig;
    ///
    /// let url = HttpCensusConfig::default().counts_url(&"06".parse()?);
    /// assert!(url.starts_with("https://api.census.gov/data/2020/dec/pl?get=P1_001N%2CP3_001N"));
    /// assert!(url.contains("in=state%3A06"));
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    #[must_use]
    pub fn counts_url(&self, state: &GeoId) -> String {
        let raw = format!("{}/{}", self.base_url, self.dataset);
        let Ok(mut url) = Url::parse(&raw) else {
            return raw;
        };
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("get", &format!("{TOTAL_COLUMN},{ADULT_COLUMN}"))
                .append_pair("for", "block group:*")
                .append_pair("in", &format!("state:{}", state.state()))
                .append_pair("in", "county:*")
                .append_pair("in", "tract:*");
            if let Some(key) = &self.api_key {
                query.append_pair("key", key);
            }
        }
        url.into()
    }
}

/// HTTP implementation of [`CountsSource`].
#[derive(Debug, Clone)]
pub struct HttpCensusApi {
    client: Client,
    config: HttpCensusConfig,
}

impl HttpCensusApi {
    /// Build a client with default configuration.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_config(HttpCensusConfig::default())
    }

    /// Build a client with explicit configuration.
    pub fn with_config(config: HttpCensusConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl CountsSource for HttpCensusApi {
    async fn fetch_counts(&self, state: &GeoId) -> Result<CensusTable, CensusError> {
        let url = self.config.counts_url(state);
        let transport = |source: TransportError| CensusError::Transport {
            state: state.to_string(),
            source,
        };
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| transport(convert_reqwest_error(err, &url)))?
            .error_for_status()
            .map_err(|err| transport(convert_reqwest_error(err, &url)))?;
        let body = response
            .bytes()
            .await
            .map_err(|err| transport(convert_reqwest_error(err, &url)))?;
        let table = parse_counts(&body)?;
        debug!("fetched {} block-group counts for state {state}", table.len());
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn key_is_appended_when_present() {
        let config = HttpCensusConfig::default()
            .with_base_url("https://example.test/data/")
            .with_api_key(Some("secret".to_owned()));
        let url = config.counts_url(&"060014001001".parse().expect("id"));
        assert!(url.starts_with("https://example.test/data/2020/dec/pl?"));
        assert!(url.contains("in=state%3A06&"));
        assert!(url.ends_with("&key=secret"));
    }

    #[rstest]
    fn blank_key_is_dropped() {
        let config = HttpCensusConfig::default().with_api_key(Some("  ".to_owned()));
        assert!(config.api_key.is_none());
        assert!(!config.counts_url(&"06".parse().expect("id")).contains("key="));
    }
}
