//! Boundary archive download: URL catalog, transport trait and HTTP adapter.

mod catalog;
mod error;
mod source;

#[doc(hidden)]
pub mod test_support;

pub(crate) use error::convert_reqwest_error;
pub use catalog::{
    ArchiveCatalog, ArchiveScope, CatalogError, DEFAULT_ARCHIVE_BASE_URL, DEFAULT_VINTAGE,
};
pub use error::TransportError;
pub use source::{
    ArchiveSource, DEFAULT_USER_AGENT, HttpArchiveSource, HttpArchiveSourceConfig,
    MIN_ARCHIVE_BYTES, looks_like_interstitial,
};
