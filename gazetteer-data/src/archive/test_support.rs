//! In-memory archive source for tests.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ArchiveSource, TransportError};

/// Stub [`ArchiveSource`] serving archives from memory.
///
/// Unknown URLs fail with HTTP 404. A number of leading calls can be made to
/// fail with a network error to exercise retry paths.
///
/// # Example
///
/// ```
/// use gazetteer_data::archive::ArchiveSource;
/// use gazetteer_data::archive::test_support::StubArchiveSource;
///
/// let source = StubArchiveSource::default().with_archive("https://example.test/a.zip", b"PK");
/// let mut sink = Vec::new();
/// let written = tokio::runtime::Builder::new_current_thread()
///     .build()?
///     .block_on(source.fetch_archive("https://example.test/a.zip", &mut sink))?;
/// assert_eq!(written, 2);
/// assert_eq!(sink, b"PK");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Default)]
pub struct StubArchiveSource {
    archives: HashMap<String, Vec<u8>>,
    failures_remaining: Mutex<u32>,
    calls: Mutex<Vec<String>>,
}

impl StubArchiveSource {
    /// Serve `bytes` at `url`.
    #[must_use]
    pub fn with_archive(mut self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.archives.insert(url.into(), bytes.into());
        self
    }

    /// Fail the next `count` calls with a network error.
    #[must_use]
    pub fn failing_first(self, count: u32) -> Self {
        if let Ok(mut remaining) = self.failures_remaining.lock() {
            *remaining = count;
        }
        self
    }

    /// URLs requested so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ArchiveSource for StubArchiveSource {
    async fn fetch_archive(
        &self,
        url: &str,
        sink: &mut (dyn Write + Send),
    ) -> Result<u64, TransportError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(url.to_owned());
        }
        let should_fail = match self.failures_remaining.lock() {
            Ok(mut remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };
        if should_fail {
            return Err(TransportError::Network {
                url: url.to_owned(),
                source: io::Error::new(io::ErrorKind::ConnectionReset, "stub failure"),
            });
        }
        let Some(bytes) = self.archives.get(url) else {
            return Err(TransportError::Http {
                url: url.to_owned(),
                status: 404,
                message: "not found".to_owned(),
            });
        };
        sink.write_all(bytes).map_err(|source| TransportError::Sink {
            url: url.to_owned(),
            source,
        })?;
        Ok(bytes.len() as u64)
    }
}
