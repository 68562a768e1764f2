//! Request and response bodies.

use std::collections::BTreeMap;

use gazetteer_core::{StoreStatus, ToleranceTier};
use serde::{Deserialize, Serialize};

/// Optional tier selection for boundary listings.
#[derive(Debug, Default, Deserialize)]
pub struct TierQuery {
    /// Simplified variant to return; authoritative geometry when absent.
    pub tier: Option<ToleranceTier>,
}

/// Query string of `/context/{regionId}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextQuery {
    /// Request the lite payload.
    #[serde(default)]
    pub lite: bool,
    /// Any value disables client caching of the response.
    pub cache_bust: Option<String>,
}

/// Simplified rows for one layer and tier.
#[derive(Debug, Serialize)]
pub struct VariantCount {
    /// Layer name.
    pub layer: &'static str,
    /// Tier name.
    pub tier: &'static str,
    /// Rows holding the variant.
    pub rows: u64,
}

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Rows per layer.
    pub layers: BTreeMap<&'static str, u64>,
    /// Simplified variant counts.
    pub variants: Vec<VariantCount>,
    /// Stored isochrone polygons.
    pub isochrones: u64,
    /// Persisted tile cache entries.
    pub cached_tiles: u64,
    /// Tiles held in memory.
    pub memory_tiles: usize,
    /// Resolved county contexts held in memory.
    pub cached_contexts: usize,
    /// Whether background seeding is running.
    pub seeding: bool,
}

impl StatusResponse {
    pub(crate) fn new(
        status: StoreStatus,
        memory_tiles: usize,
        cached_contexts: usize,
        seeding: bool,
    ) -> Self {
        Self {
            layers: status
                .layers
                .into_iter()
                .map(|(layer, rows)| (layer.as_str(), rows))
                .collect(),
            variants: status
                .variants
                .into_iter()
                .map(|(layer, tier, rows)| VariantCount {
                    layer: layer.as_str(),
                    tier: tier.as_str(),
                    rows,
                })
                .collect(),
            isochrones: status.isochrones,
            cached_tiles: status.cached_tiles,
            memory_tiles,
            cached_contexts,
            seeding,
        }
    }
}
