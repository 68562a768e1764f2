//! Zipped boundary shapefiles.
//!
//! Archives are unpacked into a scratch directory and read one shape and
//! attribute record at a time, so an archive never has to fit in memory as
//! geometry. Source coordinates are NAD83 geographic and are reprojected to
//! the store's WGS84 before they leave this module.

mod extract;
mod read;

#[doc(hidden)]
pub mod test_support;

use std::path::PathBuf;

use thiserror::Error;

pub use extract::{ExtractedShapefile, extract_shapefile};
pub use read::{ShapeRecord, ShapeStats, for_each_shape};

/// Errors raised while unpacking or reading an archive.
#[derive(Debug, Error)]
pub enum ShapefileError {
    /// The file is not a readable zip archive.
    #[error("failed to read archive {path}: {source}")]
    Archive {
        /// Archive location.
        path: PathBuf,
        /// Zip failure.
        #[source]
        source: zip::result::ZipError,
    },
    /// A filesystem step failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A required member is absent.
    #[error("archive {path} has no .{extension} member")]
    MissingMember {
        /// Archive location.
        path: PathBuf,
        /// Missing extension.
        extension: &'static str,
    },
    /// The shapefile reader failed.
    #[error("failed to read shapefile {path}: {source}")]
    Read {
        /// Shapefile location.
        path: PathBuf,
        /// Reader failure.
        #[source]
        source: shapefile::Error,
    },
}
