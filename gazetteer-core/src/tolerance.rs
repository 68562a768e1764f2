//! Whitelisted simplification tolerances.
//!
//! Simplified geometry variants are precomputed for a small, closed set of
//! tiers. Queries select a tier by its stored key, so no tolerance value ever
//! reaches SQL text.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geoid::Layer;

/// Ground resolution of a 256-pixel Web Mercator tile at zoom 0, metres per
/// pixel at the equator.
const GROUND_RESOLUTION_Z0_M: f64 = 156_543.033_928_040_97;

/// Smallest tolerance the tile server asks for, in metres.
pub const TOLERANCE_FLOOR_M: f64 = 50.0;

/// A precomputed simplification tolerance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ToleranceTier {
    /// 10 m, block-group detail.
    Detail,
    /// 50 m.
    Fine,
    /// 250 m.
    Medium,
    /// 1 km.
    Coarse,
}

/// Error returned when parsing an unknown tier name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown tolerance tier {name:?}; expected detail, fine, medium or coarse")]
pub struct UnknownTier {
    /// Rejected name.
    pub name: String,
}

impl ToleranceTier {
    /// All tiers, finest first.
    pub const ALL: [Self; 4] = [Self::Detail, Self::Fine, Self::Medium, Self::Coarse];

    /// Tolerance in planar metres.
    #[must_use]
    pub const fn metres(self) -> f64 {
        match self {
            Self::Detail => 10.0,
            Self::Fine => 50.0,
            Self::Medium => 250.0,
            Self::Coarse => 1000.0,
        }
    }

    /// Storage key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Detail => "detail",
            Self::Fine => "fine",
            Self::Medium => "medium",
            Self::Coarse => "coarse",
        }
    }

    /// Largest tier not exceeding `metres`, or the finest tier.
    #[must_use]
    pub fn snap_down(metres: f64) -> Self {
        Self::ALL
            .into_iter()
            .rev()
            .find(|tier| tier.metres() <= metres)
            .unwrap_or(Self::Detail)
    }

    /// Tier used for county outlines at `zoom`.
    ///
    /// The requested tolerance is half a pixel at that zoom, bounded below by
    /// [`TOLERANCE_FLOOR_M`], so detail grows as the map zooms in.
    ///
    /// ```
    /// use gazetteer_core::ToleranceTier;
    ///
    /// assert_eq!(ToleranceTier::for_zoom(6), ToleranceTier::Coarse);
    /// assert_eq!(ToleranceTier::for_zoom(8), ToleranceTier::Medium);
    /// assert_eq!(ToleranceTier::for_zoom(12), ToleranceTier::Fine);
    /// ```
    #[must_use]
    pub fn for_zoom(zoom: u8) -> Self {
        Self::snap_down(tolerance_for_zoom(zoom))
    }

    /// Tiers maintained for `layer` by default.
    #[must_use]
    pub const fn defaults_for(layer: Layer) -> &'static [Self] {
        match layer {
            Layer::State => &[Self::Coarse],
            Layer::County => &[Self::Coarse, Self::Medium, Self::Fine],
            Layer::BlockGroup => &[Self::Detail],
        }
    }
}

/// Requested tolerance in metres for `zoom`: half a pixel, never below the
/// floor.
#[must_use]
pub fn tolerance_for_zoom(zoom: u8) -> f64 {
    let pixel = GROUND_RESOLUTION_Z0_M / 2_f64.powi(i32::from(zoom));
    (pixel / 2.0).max(TOLERANCE_FLOOR_M)
}

impl fmt::Display for ToleranceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToleranceTier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str() == s)
            .ok_or_else(|| UnknownTier { name: s.to_owned() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, ToleranceTier::Detail)]
    #[case(49.9, ToleranceTier::Detail)]
    #[case(50.0, ToleranceTier::Fine)]
    #[case(999.0, ToleranceTier::Medium)]
    #[case(10_000.0, ToleranceTier::Coarse)]
    fn snaps_down_to_whitelist(#[case] metres: f64, #[case] tier: ToleranceTier) {
        assert_eq!(ToleranceTier::snap_down(metres), tier);
    }

    #[rstest]
    fn tolerance_shrinks_with_zoom_until_floor() {
        let tolerances: Vec<f64> = (0..=22).map(tolerance_for_zoom).collect();
        assert!(tolerances.windows(2).all(|pair| pair[0] >= pair[1]));
        assert_eq!(tolerance_for_zoom(22), TOLERANCE_FLOOR_M);
        assert!(ToleranceTier::for_zoom(6) > ToleranceTier::for_zoom(10));
    }

    #[rstest]
    fn parses_storage_keys() {
        for tier in ToleranceTier::ALL {
            assert_eq!(tier.as_str().parse::<ToleranceTier>(), Ok(tier));
        }
        assert!("tiny".parse::<ToleranceTier>().is_err());
    }
}
