use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderMap, SET_COOKIE};
use reqwest::{Client, Response};

use super::TransportError;
use super::error::convert_reqwest_error;

/// Default user agent for archive and counts requests.
pub const DEFAULT_USER_AGENT: &str = "gazetteer-ingest/0.1";

/// Responses declaring fewer bytes than this are treated as challenge pages.
pub const MIN_ARCHIVE_BYTES: u64 = 1024;

const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_COOLDOWN_SECS: u64 = 5;

/// Fetch archive bytes into a caller-provided sink.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Stream the archive at `url` into `sink`, returning the bytes written.
    async fn fetch_archive(
        &self,
        url: &str,
        sink: &mut (dyn Write + Send),
    ) -> Result<u64, TransportError>;
}

/// Configuration for [`HttpArchiveSource`].
#[derive(Debug, Clone)]
pub struct HttpArchiveSourceConfig {
    /// Whole-request timeout, body included.
    pub timeout: Duration,
    /// User agent string.
    pub user_agent: String,
    /// Pause before retrying after a challenge page.
    pub interstitial_cooldown: Duration,
}

impl Default for HttpArchiveSourceConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            interstitial_cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
        }
    }
}

impl HttpArchiveSourceConfig {
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

    /// Set the pause taken after a challenge page.
    #[must_use]
    pub fn with_interstitial_cooldown(mut self, cooldown: Duration) -> Self {
        self.interstitial_cooldown = cooldown;
        self
    }
}

/// HTTP implementation of [`ArchiveSource`].
///
/// The distribution service occasionally answers with an HTML challenge page
/// instead of the archive. When that happens the source collects any session
/// cookies the page set, waits for the configured cooldown and retries once
/// with those cookies. A second non-archive answer fails with
/// [`TransportError::Interstitial`].
#[derive(Debug, Clone)]
pub struct HttpArchiveSource {
    client: Client,
    config: HttpArchiveSourceConfig,
}

impl HttpArchiveSource {
    /// Build a source with default configuration.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_config(HttpArchiveSourceConfig::default())
    }

    /// Build a source with explicit configuration.
    pub fn with_config(config: HttpArchiveSourceConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(Duration::from_secs(30))
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    async fn request(&self, url: &str, cookies: Option<&str>) -> Result<Response, TransportError> {
        let mut request = self.client.get(url);
        if let Some(cookies) = cookies {
            request = request.header(COOKIE, cookies);
        }
        request
            .send()
            .await
            .map_err(|err| convert_reqwest_error(err, url))?
            .error_for_status()
            .map_err(|err| convert_reqwest_error(err, url))
    }
}

#[async_trait]
impl ArchiveSource for HttpArchiveSource {
    async fn fetch_archive(
        &self,
        url: &str,
        sink: &mut (dyn Write + Send),
    ) -> Result<u64, TransportError> {
        let first = self.request(url, None).await?;
        let response = if is_challenge(&first) {
            let cookies = harvest_cookies(first.headers());
            warn!(
                "{url} answered with a challenge page ({:?}); retrying once after {:?}",
                content_type(&first),
                self.config.interstitial_cooldown
            );
            drop(first);
            tokio::time::sleep(self.config.interstitial_cooldown).await;
            let second = self.request(url, cookies.as_deref()).await?;
            if is_challenge(&second) {
                return Err(TransportError::Interstitial {
                    url: url.to_owned(),
                    content_type: content_type(&second),
                    content_length: second.content_length(),
                });
            }
            second
        } else {
            first
        };
        stream_body(response, url, sink).await
    }
}

fn content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

fn is_challenge(response: &Response) -> bool {
    looks_like_interstitial(content_type(response).as_deref(), response.content_length())
}

/// Whether a response with these headers is a challenge page rather than an
/// archive.
///
/// HTML and plain-text bodies are challenges, as is any response declaring
/// fewer than [`MIN_ARCHIVE_BYTES`]. A missing length (chunked transfer) is
/// not held against the response.
#[must_use]
pub fn looks_like_interstitial(content_type: Option<&str>, content_length: Option<u64>) -> bool {
    let textual = content_type.is_some_and(|value| {
        let mime = value
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        mime == "text/html" || mime == "text/plain"
    });
    let tiny = content_length.is_some_and(|length| length < MIN_ARCHIVE_BYTES);
    textual || tiny
}

/// Join the `name=value` pairs of every `Set-Cookie` header into one
/// `Cookie` header value.
pub(crate) fn harvest_cookies(headers: &HeaderMap) -> Option<String> {
    let pairs: Vec<&str> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

async fn stream_body(
    response: Response,
    url: &str,
    sink: &mut (dyn Write + Send),
) -> Result<u64, TransportError> {
    let mut written = 0_u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| convert_reqwest_error(err, url))?;
        sink.write_all(&chunk).map_err(|source| TransportError::Sink {
            url: url.to_owned(),
            source,
        })?;
        written += chunk.len() as u64;
    }
    sink.flush().map_err(|source| TransportError::Sink {
        url: url.to_owned(),
        source,
    })?;
    debug!("downloaded {written} bytes from {url}");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use rstest::rstest;

    #[rstest]
    #[case(Some("text/html; charset=utf-8"), Some(50_000), true)]
    #[case(Some("TEXT/PLAIN"), None, true)]
    #[case(Some("application/zip"), Some(200), true)]
    #[case(Some("application/zip"), Some(4_096), false)]
    #[case(Some("application/octet-stream"), None, false)]
    #[case(None, None, false)]
    fn classifies_challenge_pages(
        #[case] content_type: Option<&str>,
        #[case] length: Option<u64>,
        #[case] expected: bool,
    ) {
        assert_eq!(looks_like_interstitial(content_type, length), expected);
    }

    #[rstest]
    fn harvests_cookie_pairs() {
        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("TS01=abc; Path=/; HttpOnly"),
        );
        headers.append(SET_COOKIE, HeaderValue::from_static("session=xyz; Secure"));
        headers.append(SET_COOKIE, HeaderValue::from_static("garbage"));
        assert_eq!(
            harvest_cookies(&headers).as_deref(),
            Some("TS01=abc; session=xyz")
        );
    }

    #[rstest]
    fn no_cookies_means_no_header() {
        assert_eq!(harvest_cookies(&HeaderMap::new()), None);
    }
}
