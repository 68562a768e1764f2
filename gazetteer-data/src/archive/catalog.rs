//! Archive locations on the boundary distribution service.

use std::fmt;

use gazetteer_core::{GeoId, Layer};
use thiserror::Error;
use url::Url;

/// Default distribution endpoint.
pub const DEFAULT_ARCHIVE_BASE_URL: &str = "https://www2.census.gov/geo/tiger";

/// Default boundary vintage.
pub const DEFAULT_VINTAGE: u16 = 2023;

/// Geographic extent of one archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArchiveScope {
    /// The national file for a layer.
    National,
    /// A single state's file.
    State(GeoId),
}

impl fmt::Display for ArchiveScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::National => f.write_str("us"),
            Self::State(id) => f.write_str(id.as_str()),
        }
    }
}

/// Errors raised while naming an archive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// The layer is published per state and needs a state scope.
    #[error("{layer} archives are published per state; a state scope is required")]
    StateRequired {
        /// Layer requested.
        layer: Layer,
    },
    /// The layer is published nationally only.
    #[error("{layer} archives are national; scope {scope} is not available")]
    NationalOnly {
        /// Layer requested.
        layer: Layer,
        /// Scope requested.
        scope: String,
    },
    /// The base URL does not parse.
    #[error("invalid archive base URL {url:?}: {source}")]
    BaseUrl {
        /// Rejected URL.
        url: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },
}

/// Builds archive URLs from a base URL and vintage year.
///
/// # Examples
///
/// ```
/// use gazetteer_core::Layer;
/// use gazetteer_data::archive::{ArchiveCatalog, ArchiveScope};
///
/// let catalog = ArchiveCatalog::new("https://example.test/tiger/", 2023);
/// let url = catalog.url_for(Layer::BlockGroup, &ArchiveScope::State("06".parse()?))?;
/// assert_eq!(url, "https://example.test/tiger/TIGER2023/BG/tl_2023_06_bg.zip");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveCatalog {
    base_url: String,
    year: u16,
}

impl Default for ArchiveCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_ARCHIVE_BASE_URL, DEFAULT_VINTAGE)
    }
}

impl ArchiveCatalog {
    /// Catalog rooted at `base_url` for vintage `year`.
    pub fn new(base_url: impl Into<String>, year: u16) -> Self {
        let raw = base_url.into();
        let trimmed = raw.trim_end_matches('/');
        let base_url = if trimmed.is_empty() {
            DEFAULT_ARCHIVE_BASE_URL.to_owned()
        } else {
            trimmed.to_owned()
        };
        Self { base_url, year }
    }

    /// Vintage year.
    #[must_use]
    pub const fn year(&self) -> u16 {
        self.year
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Archive file name for `layer` and `scope`.
    pub fn file_name(&self, layer: Layer, scope: &ArchiveScope) -> Result<String, CatalogError> {
        let year = self.year;
        match (layer, scope) {
            (Layer::State, ArchiveScope::National) => Ok(format!("tl_{year}_us_state.zip")),
            (Layer::County, ArchiveScope::National) => Ok(format!("tl_{year}_us_county.zip")),
            (Layer::BlockGroup, ArchiveScope::State(state)) => {
                Ok(format!("tl_{year}_{}_bg.zip", state.state()))
            }
            (Layer::BlockGroup, ArchiveScope::National) => {
                Err(CatalogError::StateRequired { layer })
            }
            (Layer::State | Layer::County, ArchiveScope::State(state)) => {
                Err(CatalogError::NationalOnly {
                    layer,
                    scope: state.to_string(),
                })
            }
        }
    }

    /// Fully qualified archive URL for `layer` and `scope`.
    pub fn url_for(&self, layer: Layer, scope: &ArchiveScope) -> Result<String, CatalogError> {
        let directory = match layer {
            Layer::State => "STATE",
            Layer::County => "COUNTY",
            Layer::BlockGroup => "BG",
        };
        let name = self.file_name(layer, scope)?;
        let raw = format!("{}/TIGER{}/{directory}/{name}", self.base_url, self.year);
        Url::parse(&raw)
            .map(String::from)
            .map_err(|source| CatalogError::BaseUrl {
                url: self.base_url.clone(),
                source,
            })
    }
}
