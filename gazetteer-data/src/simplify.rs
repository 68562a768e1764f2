//! Simplified-geometry maintenance.
//!
//! Variants are computed in CONUS Albers metres with topology-preserving
//! Visvalingam–Whyatt simplification. The area threshold is the square of
//! the tier's tolerance, so a 250 m tier drops vertices whose effective
//! triangle is smaller than 250 m × 250 m.

use gazetteer_core::{Crs, Layer, SpatialStore, StoreError, ToleranceTier, reproject};
use geo::{Area, MultiPolygon, Polygon, SimplifyVwPreserve};
use log::{debug, info};
use thiserror::Error;

/// Errors raised while maintaining variants.
#[derive(Debug, Error)]
pub enum SimplifyError {
    /// A store read or write failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Work done by one [`ensure_simplified`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimplifyReport {
    /// Layer processed.
    pub layer: Layer,
    /// Tier processed.
    pub tier: ToleranceTier,
    /// Batches that wrote rows.
    pub batches: u64,
    /// Variant rows written.
    pub rows_written: u64,
}

/// Fill in every missing `tier` variant for `layer`.
///
/// Rows are processed `batch_size` at a time until a batch writes nothing.
/// Once every row has its variant a further call writes zero rows.
///
/// # Examples
///
/// ```
/// use gazetteer_core::{Layer, ToleranceTier, test_support::SampleWorld};
/// use gazetteer_data::simplify::ensure_simplified;
///
/// let store = SampleWorld::store()?;
/// let first = ensure_simplified(&store, Layer::County, ToleranceTier::Coarse, 2)?;
/// assert_eq!(first.rows_written, 3);
/// let again = ensure_simplified(&store, Layer::County, ToleranceTier::Coarse, 2)?;
/// assert_eq!(again.rows_written, 0);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn ensure_simplified(
    store: &SpatialStore,
    layer: Layer,
    tier: ToleranceTier,
    batch_size: usize,
) -> Result<SimplifyReport, SimplifyError> {
    store.ensure_simplified_schema()?;
    let mut report = SimplifyReport {
        layer,
        tier,
        batches: 0,
        rows_written: 0,
    };
    let missing = store.count_missing_variants(layer, tier)?;
    if missing == 0 {
        debug!("{layer} {tier}: every row already simplified");
        return Ok(report);
    }
    info!("{layer} {tier}: simplifying {missing} rows");

    let limit = batch_size.max(1);
    loop {
        let pending = store.missing_variant_batch(layer, tier, limit)?;
        if pending.is_empty() {
            break;
        }
        let variants: Vec<(i64, MultiPolygon<f64>)> = pending
            .iter()
            .map(|row| (row.feature_id, simplify_geometry(&row.geometry, tier)))
            .collect();
        let written = store.write_variants(layer, tier, &variants)?;
        if written == 0 {
            break;
        }
        report.batches += 1;
        report.rows_written += written;
        debug!("{layer} {tier}: batch {} wrote {written} rows", report.batches);
    }
    info!(
        "{layer} {tier}: wrote {} rows in {} batches",
        report.rows_written, report.batches
    );
    Ok(report)
}

/// Run [`ensure_simplified`] for every layer's default tiers.
pub fn ensure_all_simplified(
    store: &SpatialStore,
    batch_size: usize,
) -> Result<Vec<SimplifyReport>, SimplifyError> {
    let mut reports = Vec::new();
    for layer in Layer::ALL {
        for &tier in ToleranceTier::defaults_for(layer) {
            reports.push(ensure_simplified(store, layer, tier, batch_size)?);
        }
    }
    Ok(reports)
}

/// Simplify a WGS84 geometry at `tier`.
///
/// Parts that collapse below a ring are dropped; if every part collapses the
/// original geometry is returned so a feature never disappears.
#[must_use]
pub fn simplify_geometry(geometry: &MultiPolygon<f64>, tier: ToleranceTier) -> MultiPolygon<f64> {
    let projected = reproject(geometry, Crs::Wgs84, Crs::ConusAlbers);
    let tolerance = tier.metres();
    let simplified = projected.simplify_vw_preserve(tolerance * tolerance);
    let parts = simplified.0.len();
    let kept: Vec<Polygon<f64>> = simplified
        .into_iter()
        .filter(|polygon| polygon.exterior().0.len() >= 4 && polygon.unsigned_area() > 0.0)
        .collect();
    if kept.is_empty() {
        debug!("all {parts} part(s) collapsed at {tier}; keeping the original geometry");
        return geometry.clone();
    }
    if kept.len() < parts {
        debug!("dropped {} collapsed part(s) at {tier}", parts - kept.len());
    }
    reproject(&MultiPolygon::new(kept), Crs::ConusAlbers, Crs::Wgs84)
}
