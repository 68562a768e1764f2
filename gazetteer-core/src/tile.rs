//! Slippy-map tile addressing in spherical Web Mercator.

use std::fmt;

use geo::{Coord, Rect};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crs::Crs;

/// Half the width of the Web Mercator world square, in metres.
pub const WORLD_HALF_EXTENT_M: f64 = 20_037_508.342_789_244;

/// Deepest zoom level the tile server accepts.
pub const MAX_ZOOM: u8 = 22;

/// Errors returned by [`TileCoord::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TileCoordError {
    /// Zoom beyond [`MAX_ZOOM`].
    #[error("zoom {z} exceeds the maximum of {MAX_ZOOM}")]
    ZoomTooDeep {
        /// Requested zoom.
        z: u8,
    },
    /// Column or row outside the `2^z` grid.
    #[error("tile {x}/{y} lies outside the {size}x{size} grid at zoom {z}")]
    OutOfRange {
        /// Requested zoom.
        z: u8,
        /// Requested column.
        x: u32,
        /// Requested row.
        y: u32,
        /// Grid size at this zoom.
        size: u64,
    },
}

/// Validated `z/x/y` tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    z: u8,
    x: u32,
    y: u32,
}

impl TileCoord {
    /// Validate a tile address.
    pub fn new(z: u8, x: u32, y: u32) -> Result<Self, TileCoordError> {
        if z > MAX_ZOOM {
            return Err(TileCoordError::ZoomTooDeep { z });
        }
        let size = 1_u64 << z;
        if u64::from(x) >= size || u64::from(y) >= size {
            return Err(TileCoordError::OutOfRange { z, x, y, size });
        }
        Ok(Self { z, x, y })
    }

    /// Zoom level.
    #[must_use]
    pub const fn z(self) -> u8 {
        self.z
    }

    /// Column, counted eastwards from the antimeridian.
    #[must_use]
    pub const fn x(self) -> u32 {
        self.x
    }

    /// Row, counted southwards from the northern edge.
    #[must_use]
    pub const fn y(self) -> u32 {
        self.y
    }

    /// Side length of this tile in Web Mercator metres.
    #[must_use]
    pub fn span_m(self) -> f64 {
        2.0 * WORLD_HALF_EXTENT_M / f64::from(1_u32 << self.z.min(31))
    }

    /// Tile envelope in Web Mercator metres.
    #[must_use]
    pub fn mercator_envelope(self) -> Rect<f64> {
        let span = self.span_m();
        let min_x = -WORLD_HALF_EXTENT_M + f64::from(self.x) * span;
        let max_y = WORLD_HALF_EXTENT_M - f64::from(self.y) * span;
        Rect::new(
            Coord { x: min_x, y: max_y - span },
            Coord { x: min_x + span, y: max_y },
        )
    }

    /// Tile envelope expanded by `fraction` of its width on every side.
    #[must_use]
    pub fn buffered_mercator_envelope(self, fraction: f64) -> Rect<f64> {
        let envelope = self.mercator_envelope();
        let pad = self.span_m() * fraction;
        Rect::new(
            Coord {
                x: envelope.min().x - pad,
                y: envelope.min().y - pad,
            },
            Coord {
                x: envelope.max().x + pad,
                y: envelope.max().y + pad,
            },
        )
    }

    /// Transform a Web Mercator envelope into the store's longitude/latitude
    /// space for spatial filtering.
    #[must_use]
    pub fn store_bounds(envelope: Rect<f64>) -> Rect<f64> {
        let min = Crs::WebMercator.transform(Crs::Wgs84, envelope.min());
        let max = Crs::WebMercator.transform(Crs::Wgs84, envelope.max());
        Rect::new(min, max)
    }

    /// Map a Web Mercator coordinate to tile-local pixel space with `extent`
    /// units per side; `y` grows downwards.
    #[must_use]
    pub fn to_tile_space(self, coord: Coord<f64>, extent: u32) -> Coord<f64> {
        let envelope = self.mercator_envelope();
        let scale = f64::from(extent) / self.span_m();
        Coord {
            x: (coord.x - envelope.min().x) * scale,
            y: (envelope.max().y - coord.y) * scale,
        }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}
