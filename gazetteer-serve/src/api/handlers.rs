//! Endpoint handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use gazetteer_core::{GeoId, Layer, SpatialStore, TileCoord, ToleranceTier};
use serde_json::{Value, json};

use super::types::{ContextQuery, StatusResponse, TierQuery};
use crate::context::{ContextMode, ContextOutcome};
use crate::error::ServeError;
use crate::geojson;
use crate::state::AppState;

/// Media type of encoded vector tiles.
pub const MVT_CONTENT_TYPE: &str = "application/vnd.mapbox-vector-tile";

/// Header naming the cache tier that answered a tile request.
pub const TILE_CACHE_HEADER: HeaderName = HeaderName::from_static("x-tile-cache");

/// Client cache lifetime of resolved contexts, seconds.
const CONTEXT_MAX_AGE_SECS: u64 = 60 * 60;

async fn blocking<T, F>(store: &Arc<SpatialStore>, work: F) -> Result<T, ServeError>
where
    T: Send + 'static,
    F: FnOnce(&SpatialStore) -> Result<T, ServeError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || work(&store)).await?
}

fn parse_tile(z: &str, x: &str, y: &str) -> Option<TileCoord> {
    let y = y
        .strip_suffix(".mvt")
        .or_else(|| y.strip_suffix(".pbf"))
        .unwrap_or(y);
    TileCoord::new(z.parse().ok()?, x.parse().ok()?, y.parse().ok()?).ok()
}

fn parse_id(raw: &str, layer: Layer) -> Result<GeoId, ServeError> {
    Ok(GeoId::for_layer(raw, layer)?)
}

/// `GET /tiles/{z}/{x}/{y}`; `y` may carry an `.mvt` or `.pbf` suffix.
pub async fn tile_handler(
    State(state): State<AppState>,
    Path((z, x, y)): Path<(String, String, String)>,
) -> Result<Response, ServeError> {
    let coord = parse_tile(&z, &x, &y)
        .ok_or_else(|| ServeError::NotFound(format!("no tile {z}/{x}/{y}")))?;
    let tile = state
        .tiles
        .tile(coord)
        .await?
        .ok_or_else(|| ServeError::NotFound(format!("tile {coord} is empty")))?;
    let headers = [
        (header::CONTENT_TYPE, MVT_CONTENT_TYPE.to_owned()),
        (
            header::CACHE_CONTROL,
            format!("public, max-age={}", tile.max_age.as_secs()),
        ),
        (TILE_CACHE_HEADER, tile.source.as_str().to_owned()),
    ];
    Ok((headers, tile.payload).into_response())
}

/// `GET /boundaries/states`.
pub async fn states_handler(
    State(state): State<AppState>,
    Query(query): Query<TierQuery>,
) -> Result<Json<Value>, ServeError> {
    let tier = query.tier.unwrap_or(ToleranceTier::Coarse);
    let states = blocking(&state.store, move |store| {
        Ok(store.boundaries_by_parent(Layer::State, None, Some(tier))?)
    })
    .await?;
    Ok(Json(geojson::boundary_collection(&states)))
}

/// `GET /boundaries/counties/{stateId}`.
pub async fn counties_handler(
    State(state): State<AppState>,
    Path(state_id): Path<String>,
    Query(query): Query<TierQuery>,
) -> Result<Json<Value>, ServeError> {
    let parent = parse_id(&state_id, Layer::State)?;
    let tier = query.tier.unwrap_or(ToleranceTier::Medium);
    let counties = blocking(&state.store, move |store| {
        if store.boundary(&parent, Some(ToleranceTier::Coarse))?.is_none() {
            return Err(ServeError::NotFound(format!("no state {parent}")));
        }
        Ok(store.boundaries_by_parent(Layer::County, Some(&parent), Some(tier))?)
    })
    .await?;
    Ok(Json(geojson::boundary_collection(&counties)))
}

/// `GET /boundaries/county/{id}`.
pub async fn county_handler(
    State(state): State<AppState>,
    Path(county_id): Path<String>,
    Query(query): Query<TierQuery>,
) -> Result<Json<Value>, ServeError> {
    let id = parse_id(&county_id, Layer::County)?;
    let county = blocking(&state.store, move |store| {
        store
            .boundary(&id, query.tier)?
            .ok_or_else(|| ServeError::NotFound(format!("no county {id}")))
    })
    .await?;
    Ok(Json(geojson::boundary_collection(&[county])))
}

/// `GET /boundaries/tracts/{countyId}`: the county's block groups, each
/// naming its tract.
pub async fn tracts_handler(
    State(state): State<AppState>,
    Path(county_id): Path<String>,
    Query(query): Query<TierQuery>,
) -> Result<Json<Value>, ServeError> {
    let county = parse_id(&county_id, Layer::County)?;
    let units = blocking(&state.store, move |store| {
        if store.boundary(&county, Some(ToleranceTier::Coarse))?.is_none() {
            return Err(ServeError::NotFound(format!("no county {county}")));
        }
        Ok(store.unit_features_in_county(&county, query.tier)?)
    })
    .await?;
    Ok(Json(geojson::boundary_collection(&units)))
}

fn empty_context(region: &GeoId, mode: ContextMode, status: &str) -> Value {
    match mode {
        ContextMode::Full => json!({
            "type": "FeatureCollection",
            "region": region,
            "features": [],
            "status": status,
        }),
        ContextMode::Lite => json!({
            "region": region,
            "points": [],
            "status": status,
        }),
    }
}

/// `GET /context/{regionId}?lite=&cacheBust=`.
///
/// Timed-out and cancelled fetches answer 200 with an empty payload whose
/// `status` says why; those responses are never cacheable.
pub async fn context_handler(
    State(state): State<AppState>,
    Path(region_id): Path<String>,
    Query(query): Query<ContextQuery>,
) -> Result<Response, ServeError> {
    let region = GeoId::new(region_id)?;
    let mode = if query.lite {
        ContextMode::Lite
    } else {
        ContextMode::Full
    };
    let response = state.contexts.context(&region, mode).await?;
    let status = response.outcome.status();
    let (body, cacheable) = match response.outcome {
        ContextOutcome::Ready(payload) => {
            let mut body = serde_json::to_value(&payload)?;
            if let Value::Object(map) = &mut body {
                map.insert("status".to_owned(), json!(status));
            }
            (body, true)
        }
        ContextOutcome::TimedOut | ContextOutcome::Cancelled => {
            (empty_context(&region, mode, status), false)
        }
    };
    let cache_control = if cacheable && query.cache_bust.is_none() {
        format!("public, max-age={CONTEXT_MAX_AGE_SECS}")
    } else {
        "no-store".to_owned()
    };
    Ok(([(header::CACHE_CONTROL, cache_control)], Json(body)).into_response())
}

/// `POST /admin/seed`.
pub async fn seed_handler(State(state): State<AppState>) -> impl IntoResponse {
    let started = state.seeder.start();
    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": started.as_str() })),
    )
}

/// `GET /status`.
pub async fn status_handler(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, ServeError> {
    let status = blocking(&state.store, |store| Ok(store.status()?)).await?;
    Ok(Json(StatusResponse::new(
        status,
        state.tiles.memory_entries(),
        state.contexts.cached(),
        state.seeder.is_running(),
    )))
}
