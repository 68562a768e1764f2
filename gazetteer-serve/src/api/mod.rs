//! HTTP surface.
//!
//! ## Endpoints
//!
//! - `GET /tiles/{z}/{x}/{y}` - Vector tile with state and county layers
//! - `GET /boundaries/states` - State outlines
//! - `GET /boundaries/counties/{stateId}` - Counties of a state
//! - `GET /boundaries/county/{id}` - One county
//! - `GET /boundaries/tracts/{countyId}` - Block groups of a county
//! - `GET /context/{regionId}` - Full or lite county context
//! - `POST /admin/seed` - Start background ingestion
//! - `GET /status` - Store and cache counters

mod handlers;
mod types;

pub use handlers::{MVT_CONTENT_TYPE, TILE_CACHE_HEADER};
pub use types::{ContextQuery, StatusResponse, TierQuery, VariantCount};

use axum::Router;
use axum::routing::{get, post};
use log::info;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::ServeError;
use crate::state::AppState;

/// Build the router with every endpoint and request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/tiles/{z}/{x}/{y}", get(handlers::tile_handler))
        .route("/boundaries/states", get(handlers::states_handler))
        .route(
            "/boundaries/counties/{state_id}",
            get(handlers::counties_handler),
        )
        .route("/boundaries/county/{id}", get(handlers::county_handler))
        .route(
            "/boundaries/tracts/{county_id}",
            get(handlers::tracts_handler),
        )
        .route("/context/{region_id}", get(handlers::context_handler))
        .route("/admin/seed", post(handlers::seed_handler))
        .route("/status", get(handlers::status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `state` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), ServeError> {
    if let Ok(addr) = listener.local_addr() {
        info!("gazetteer listening on {addr}");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("gazetteer server stopped");
    Ok(())
}
