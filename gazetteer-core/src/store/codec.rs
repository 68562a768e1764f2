//! Geometry blob format.
//!
//! Geometries are stored as a four-byte magic, a format version and a
//! `bincode` payload of the `geo` multi-polygon. A SHA-256 digest of the blob
//! lets upserts detect whether a geometry actually changed.

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Blob identifier for stored geometries.
pub(crate) const GEOMETRY_MAGIC: [u8; 4] = *b"GZGM";

/// Supported version of the geometry blob format.
pub(crate) const GEOMETRY_VERSION: u16 = 1;

#[derive(Serialize)]
struct GeometryBlobRef<'a> {
    magic: [u8; 4],
    version: u16,
    geometry: &'a MultiPolygon<f64>,
}

#[derive(Deserialize)]
struct GeometryBlob {
    magic: [u8; 4],
    version: u16,
    geometry: MultiPolygon<f64>,
}

/// Error raised when encoding or decoding a geometry blob.
#[derive(Debug, Error)]
pub enum GeometryCodecError {
    /// `bincode` failed.
    #[error("failed to {action} geometry blob: {source}")]
    Bincode {
        /// Either `encode` or `decode`.
        action: &'static str,
        /// Underlying error.
        #[source]
        source: bincode::Error,
    },
    /// The geometry has no coordinates to store.
    #[error("geometry has no extent")]
    Empty,
    /// The blob did not carry the geometry magic.
    #[error("invalid geometry magic: expected {expected:?}, found {found:?}")]
    InvalidMagic {
        /// Expected bytes.
        expected: [u8; 4],
        /// Bytes found.
        found: [u8; 4],
    },
    /// The blob was written by a newer format.
    #[error("unsupported geometry blob version {found}; supported version is {supported}")]
    UnsupportedVersion {
        /// Version in the blob.
        found: u16,
        /// Version this build reads.
        supported: u16,
    },
}

/// Serialise a geometry into its stored form.
pub(crate) fn encode_geometry(geometry: &MultiPolygon<f64>) -> Result<Vec<u8>, GeometryCodecError> {
    bincode::serialize(&GeometryBlobRef {
        magic: GEOMETRY_MAGIC,
        version: GEOMETRY_VERSION,
        geometry,
    })
    .map_err(|source| GeometryCodecError::Bincode {
        action: "encode",
        source,
    })
}

/// Decode a stored geometry, validating the header.
pub(crate) fn decode_geometry(bytes: &[u8]) -> Result<MultiPolygon<f64>, GeometryCodecError> {
    let blob: GeometryBlob =
        bincode::deserialize(bytes).map_err(|source| GeometryCodecError::Bincode {
            action: "decode",
            source,
        })?;
    if blob.magic != GEOMETRY_MAGIC {
        return Err(GeometryCodecError::InvalidMagic {
            expected: GEOMETRY_MAGIC,
            found: blob.magic,
        });
    }
    if blob.version != GEOMETRY_VERSION {
        return Err(GeometryCodecError::UnsupportedVersion {
            found: blob.version,
            supported: GEOMETRY_VERSION,
        });
    }
    Ok(blob.geometry)
}

/// Hex SHA-256 of an encoded geometry.
pub(crate) fn geometry_digest(blob: &[u8]) -> String {
    hex::encode(Sha256::digest(blob))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Rect, coord};
    use rstest::{fixture, rstest};

    #[fixture]
    fn square() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![
            Rect::new(coord! { x: -1.0, y: -1.0 }, coord! { x: 1.0, y: 1.0 }).to_polygon(),
        ])
    }

    #[rstest]
    fn decodes_what_it_encodes(square: MultiPolygon<f64>) {
        let blob = encode_geometry(&square).expect("encode");
        assert_eq!(decode_geometry(&blob).expect("decode"), square);
    }

    #[rstest]
    fn rejects_foreign_magic(square: MultiPolygon<f64>) {
        let mut blob = encode_geometry(&square).expect("encode");
        blob[0] = b'X';
        assert!(matches!(
            decode_geometry(&blob),
            Err(GeometryCodecError::InvalidMagic { .. })
        ));
    }

    #[rstest]
    fn rejects_future_versions(square: MultiPolygon<f64>) {
        let mut blob = encode_geometry(&square).expect("encode");
        // bincode writes the u16 version little-endian right after the magic.
        blob[4] = 9;
        assert!(matches!(
            decode_geometry(&blob),
            Err(GeometryCodecError::UnsupportedVersion { found: 9, .. })
        ));
    }

    #[rstest]
    fn digest_tracks_geometry_changes(square: MultiPolygon<f64>) {
        let first = geometry_digest(&encode_geometry(&square).expect("encode"));
        let again = geometry_digest(&encode_geometry(&square).expect("encode"));
        let moved = MultiPolygon::new(vec![
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 }).to_polygon(),
        ]);
        assert_eq!(first, again);
        assert_ne!(first, geometry_digest(&encode_geometry(&moved).expect("encode")));
    }
}
