//! Hierarchical census identifiers and the layers they belong to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Administrative layer held by the store.
///
/// Identifiers are fixed width per layer, so the owning county and state of
/// any unit can be derived from its identifier prefix alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// States and state-equivalents (two-digit identifiers).
    State,
    /// Counties and county-equivalents (five-digit identifiers).
    County,
    /// Census block groups (twelve-digit identifiers).
    BlockGroup,
}

impl Layer {
    /// Every layer, coarsest first.
    pub const ALL: [Self; 3] = [Self::State, Self::County, Self::BlockGroup];

    /// Width of identifiers in this layer.
    #[must_use]
    pub const fn id_width(self) -> usize {
        match self {
            Self::State => 2,
            Self::County => 5,
            Self::BlockGroup => 12,
        }
    }

    /// Stable lowercase name used in storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::County => "county",
            Self::BlockGroup => "block_group",
        }
    }

    /// Layer whose identifiers have the given width.
    #[must_use]
    pub fn for_width(width: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|layer| layer.id_width() == width)
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = GeoIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "state" => Ok(Self::State),
            "county" => Ok(Self::County),
            "block_group" | "block-group" => Ok(Self::BlockGroup),
            other => Err(GeoIdError::UnknownLayer {
                name: other.to_owned(),
            }),
        }
    }
}

/// Errors returned when parsing identifiers or layer names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeoIdError {
    /// The identifier contained something other than ASCII digits.
    #[error("identifier {value:?} must contain only ASCII digits")]
    NonDigit {
        /// Rejected input.
        value: String,
    },
    /// The identifier length matches no layer.
    #[error("identifier {value:?} has {len} digits; expected 2, 5 or 12")]
    BadWidth {
        /// Rejected input.
        value: String,
        /// Observed length.
        len: usize,
    },
    /// The identifier belongs to a different layer than required.
    #[error("identifier {value} is a {found} identifier, expected {expected}")]
    WrongLayer {
        /// Offending identifier.
        value: String,
        /// Layer the caller required.
        expected: Layer,
        /// Layer implied by the identifier width.
        found: Layer,
    },
    /// Layer name was not recognised.
    #[error("unknown layer {name:?}")]
    UnknownLayer {
        /// Rejected layer name.
        name: String,
    },
}

/// Validated fixed-width census identifier (GEOID).
///
/// # Examples
///
/// ```
/// use gazetteer_core::{GeoId, Layer};
///
/// # fn main() -> Result<(), gazetteer_core::GeoIdError> {
/// let unit: GeoId = "060014001001".parse()?;
/// assert_eq!(unit.layer(), Layer::BlockGroup);
/// assert_eq!(unit.county().as_str(), "06001");
/// assert_eq!(unit.state().as_str(), "06");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GeoId(String);

impl GeoId {
    /// Parse an identifier of any layer.
    pub fn new(value: impl Into<String>) -> Result<Self, GeoIdError> {
        let value = value.into();
        if !value.bytes().all(|b| b.is_ascii_digit()) || value.is_empty() {
            return Err(GeoIdError::NonDigit { value });
        }
        if Layer::for_width(value.len()).is_none() {
            let len = value.len();
            return Err(GeoIdError::BadWidth { value, len });
        }
        Ok(Self(value))
    }

    /// Parse an identifier and require it to belong to `layer`.
    pub fn for_layer(value: impl Into<String>, layer: Layer) -> Result<Self, GeoIdError> {
        let id = Self::new(value)?;
        let found = id.layer();
        if found == layer {
            Ok(id)
        } else {
            Err(GeoIdError::WrongLayer {
                value: id.0,
                expected: layer,
                found,
            })
        }
    }

    /// Layer implied by the identifier width.
    #[must_use]
    pub fn layer(&self) -> Layer {
        Layer::for_width(self.0.len()).unwrap_or(Layer::BlockGroup)
    }

    /// Borrow the digits.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Owning state identifier.
    #[must_use]
    pub fn state(&self) -> Self {
        self.truncated(Layer::State.id_width())
    }

    /// Owning county identifier, or `self` for a county. States have no
    /// county and return themselves.
    #[must_use]
    pub fn county(&self) -> Self {
        self.truncated(Layer::County.id_width())
    }

    /// Eleven-digit tract identifier for block groups, if any.
    #[must_use]
    pub fn tract(&self) -> Option<&str> {
        match self.layer() {
            Layer::BlockGroup => self.0.get(..11),
            _ => None,
        }
    }

    /// Whether `self` lies inside `ancestor` according to the identifier
    /// hierarchy.
    #[must_use]
    pub fn is_within(&self, ancestor: &Self) -> bool {
        self.0.starts_with(ancestor.as_str())
    }

    fn truncated(&self, width: usize) -> Self {
        Self(self.0.get(..width).unwrap_or(&self.0).to_owned())
    }
}

impl fmt::Display for GeoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for GeoId {
    type Err = GeoIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for GeoId {
    type Error = GeoIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<GeoId> for String {
    fn from(value: GeoId) -> Self {
        value.0
    }
}

impl AsRef<str> for GeoId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("06", Layer::State)]
    #[case("06001", Layer::County)]
    #[case("060014001001", Layer::BlockGroup)]
    fn layer_follows_width(#[case] raw: &str, #[case] layer: Layer) {
        let id = GeoId::new(raw).expect("valid id");
        assert_eq!(id.layer(), layer);
    }

    #[rstest]
    #[case("6")]
    #[case("0600")]
    #[case("0600140010011")]
    fn rejects_unknown_widths(#[case] raw: &str) {
        assert!(matches!(
            GeoId::new(raw),
            Err(GeoIdError::BadWidth { .. })
        ));
    }

    #[rstest]
    #[case("06a01")]
    #[case("")]
    #[case("０６")]
    fn rejects_non_digits(#[case] raw: &str) {
        assert!(matches!(GeoId::new(raw), Err(GeoIdError::NonDigit { .. })));
    }

    #[rstest]
    fn prefixes_derive_owners() {
        let id = GeoId::new("060014001001").expect("valid id");
        assert_eq!(id.state().as_str(), "06");
        assert_eq!(id.county().as_str(), "06001");
        assert_eq!(id.tract(), Some("06001400100"));
        assert!(id.is_within(&GeoId::new("06001").expect("county")));
        assert!(!id.is_within(&GeoId::new("06003").expect("county")));
    }

    #[rstest]
    fn for_layer_rejects_mismatch() {
        let err = GeoId::for_layer("06", Layer::County).expect_err("state is not a county");
        assert!(matches!(
            err,
            GeoIdError::WrongLayer {
                expected: Layer::County,
                found: Layer::State,
                ..
            }
        ));
    }

    #[rstest]
    fn serde_round_trips_through_strings() {
        let id: GeoId = serde_json::from_str("\"06001\"").expect("deserialise");
        assert_eq!(serde_json::to_string(&id).expect("serialise"), "\"06001\"");
        assert!(serde_json::from_str::<GeoId>("\"6001\"").is_err());
    }
}
