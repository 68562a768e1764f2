//! Block-group population counts from the national statistical API.
//!
//! Counts come from the decennial redistricting dataset: `P1_001N` is the
//! total population and `P3_001N` the population aged 18 and over. The API
//! answers with a JSON array of string arrays whose first row names the
//! columns.

mod http;

#[doc(hidden)]
pub mod test_support;

use std::collections::HashMap;

use async_trait::async_trait;
use gazetteer_core::{GeoId, Population};
use thiserror::Error;

use crate::archive::TransportError;

pub use http::{DEFAULT_CENSUS_BASE_URL, HttpCensusApi, HttpCensusConfig};

/// Column holding total population.
pub const TOTAL_COLUMN: &str = "P1_001N";
/// Column holding adult population.
pub const ADULT_COLUMN: &str = "P3_001N";

/// Errors raised while fetching or parsing counts.
#[derive(Debug, Error)]
pub enum CensusError {
    /// The request failed.
    #[error("counts request for state {state} failed: {source}")]
    Transport {
        /// State requested.
        state: String,
        /// Transport failure.
        #[source]
        source: TransportError,
    },
    /// The body was not a JSON table.
    #[error("counts response is not a JSON table: {source}")]
    Decode {
        /// Decoder failure.
        #[source]
        source: serde_json::Error,
    },
    /// The header row lacks a required column.
    #[error("counts response is missing column {column}")]
    MissingColumn {
        /// Column name.
        column: &'static str,
    },
    /// A row has an unusable value.
    #[error("counts row {row} is malformed: {reason}")]
    MalformedRow {
        /// One-based data row number.
        row: usize,
        /// What was wrong.
        reason: String,
    },
}

/// Population counts keyed by block-group identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CensusTable {
    counts: HashMap<GeoId, Population>,
}

impl CensusTable {
    /// Counts for `id`, if the table has them.
    #[must_use]
    pub fn get(&self, id: &GeoId) -> Option<Population> {
        self.counts.get(id).copied()
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Add or replace a row.
    pub fn insert(&mut self, id: GeoId, population: Population) {
        self.counts.insert(id, population);
    }
}

impl FromIterator<(GeoId, Population)> for CensusTable {
    fn from_iter<I: IntoIterator<Item = (GeoId, Population)>>(iter: I) -> Self {
        Self {
            counts: iter.into_iter().collect(),
        }
    }
}

/// Source of per-state block-group counts.
#[async_trait]
pub trait CountsSource: Send + Sync {
    /// Fetch counts for every block group of `state`.
    async fn fetch_counts(&self, state: &GeoId) -> Result<CensusTable, CensusError>;
}

/// Parse the API's header-plus-rows table.
///
/// The block-group identifier is the concatenation of the `state`, `county`,
/// `tract` and `block group` columns. Missing count values read as zero.
///
/// # Examples
///
/// ```
/// use gazetteer_data::census::parse_counts;
///
/// let body = br#"[
///   ["P1_001N","P3_001N","state","county","tract","block group"],
///   ["1520","1190","06","001","400100","1"]
/// ]"#;
/// let table = parse_counts(body)?;
/// let counts = table.get(&"060014001001".parse()?).expect("row");
/// assert_eq!((counts.total, counts.adult), (1520, 1190));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn parse_counts(body: &[u8]) -> Result<CensusTable, CensusError> {
    let rows: Vec<Vec<Option<String>>> =
        serde_json::from_slice(body).map_err(|source| CensusError::Decode { source })?;
    let mut rows = rows.into_iter();
    let Some(header) = rows.next() else {
        return Ok(CensusTable::default());
    };
    let column = |name: &'static str| {
        header
            .iter()
            .position(|cell| cell.as_deref() == Some(name))
            .ok_or(CensusError::MissingColumn { column: name })
    };
    let total_at = column(TOTAL_COLUMN)?;
    let adult_at = column(ADULT_COLUMN)?;
    let state_at = column("state")?;
    let county_at = column("county")?;
    let tract_at = column("tract")?;
    let group_at = column("block group")?;

    let mut table = CensusTable::default();
    for (index, row) in rows.enumerate() {
        let number = index + 1;
        let cell = |at: usize| row.get(at).and_then(Option::as_deref).unwrap_or_default();
        let raw_id = format!(
            "{}{}{}{}",
            cell(state_at),
            cell(county_at),
            cell(tract_at),
            cell(group_at)
        );
        let id = GeoId::new(raw_id).map_err(|err| CensusError::MalformedRow {
            row: number,
            reason: err.to_string(),
        })?;
        let count = |at: usize, name: &str| -> Result<u64, CensusError> {
            let value = cell(at);
            if value.is_empty() {
                return Ok(0);
            }
            value.parse().map_err(|_| CensusError::MalformedRow {
                row: number,
                reason: format!("{name} value {value:?} is not a count"),
            })
        };
        let population = Population::new(count(total_at, TOTAL_COLUMN)?, count(adult_at, ADULT_COLUMN)?);
        table.insert(id, population);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const HEADER: &str = r#"["P1_001N","P3_001N","state","county","tract","block group"]"#;

    #[rstest]
    fn parses_rows_and_joins_identifier() {
        let body = format!(
            r#"[{HEADER},["10","7","06","001","400100","1"],["3",null,"06","001","400100","2"]]"#
        );
        let table = parse_counts(body.as_bytes()).expect("parse");
        assert_eq!(table.len(), 2);
        let id: GeoId = "060014001002".parse().expect("id");
        assert_eq!(table.get(&id), Some(Population::new(3, 0)));
    }

    #[rstest]
    fn reordered_columns_are_located_by_name() {
        let body = br#"[["state","county","tract","block group","P3_001N","P1_001N"],
                        ["06","001","400100","1","5","9"]]"#;
        let table = parse_counts(body).expect("parse");
        let id: GeoId = "060014001001".parse().expect("id");
        assert_eq!(table.get(&id), Some(Population::new(9, 5)));
    }

    #[rstest]
    fn missing_column_is_reported() {
        let body = br#"[["P1_001N","state","county","tract","block group"]]"#;
        assert!(matches!(
            parse_counts(body),
            Err(CensusError::MissingColumn { column: ADULT_COLUMN })
        ));
    }

    #[rstest]
    #[case(r#"["x","7","06","001","400100","1"]"#)]
    #[case(r#"["1","7","06","001","4001","1"]"#)]
    fn malformed_rows_fail(#[case] row: &str) {
        let body = format!("[{HEADER},{row}]");
        assert!(matches!(
            parse_counts(body.as_bytes()),
            Err(CensusError::MalformedRow { row: 1, .. })
        ));
    }

    #[rstest]
    fn empty_body_is_an_empty_table() {
        assert!(parse_counts(b"[]").expect("parse").is_empty());
    }
}
