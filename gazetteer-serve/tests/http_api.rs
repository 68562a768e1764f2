//! Router tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use gazetteer_core::test_support::SampleWorld;
use gazetteer_data::ingest::{IngestError, IngestReport};
use gazetteer_serve::api::{MVT_CONTENT_TYPE, TILE_CACHE_HEADER};
use gazetteer_serve::{AppState, SeedJob, SeedLauncher, ServeConfig, router};
use rstest::{fixture, rstest};
use serde_json::Value;
use tokio::sync::Notify;
use tower::ServiceExt;

/// Seeding job that waits until released.
#[derive(Default)]
struct ParkedJob {
    release: Notify,
}

#[async_trait]
impl SeedJob for ParkedJob {
    async fn seed(&self) -> Result<IngestReport, IngestError> {
        self.release.notified().await;
        Ok(IngestReport::default())
    }
}

#[fixture]
fn state() -> AppState {
    let store = Arc::new(SampleWorld::store().expect("sample store"));
    let seeder = Arc::new(SeedLauncher::new(Arc::new(ParkedJob::default())));
    AppState::new(store, seeder, ServeConfig::default())
}

async fn send(state: &AppState, method: &str, uri: &str) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request");
    router(state.clone())
        .oneshot(request)
        .await
        .expect("router is infallible")
}

async fn get(state: &AppState, uri: &str) -> Response {
    send(state, "GET", uri).await
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn header_value<'a>(response: &'a Response, name: impl axum::http::header::AsHeaderName) -> &'a str {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

fn names(collection: &Value) -> Vec<String> {
    collection["features"]
        .as_array()
        .expect("features")
        .iter()
        .map(|feature| feature["properties"]["name"].as_str().unwrap_or_default().to_owned())
        .collect()
}

#[rstest]
#[tokio::test]
async fn tiles_are_served_then_cached(state: AppState) {
    let first = get(&state, "/tiles/6/10/24.mvt").await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header_value(&first, header::CONTENT_TYPE), MVT_CONTENT_TYPE);
    assert_eq!(
        header_value(&first, header::CACHE_CONTROL),
        "public, max-age=3600"
    );
    assert_eq!(header_value(&first, TILE_CACHE_HEADER), "miss");
    let bytes = axum::body::to_bytes(first.into_body(), usize::MAX)
        .await
        .expect("body");
    let reader = mvt_reader::Reader::new(bytes.to_vec()).expect("decodable tile");
    let layers = reader.get_layer_names().expect("layer names");
    assert_eq!(layers, vec!["states".to_owned(), "counties".to_owned()]);

    let second = get(&state, "/tiles/6/10/24").await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(header_value(&second, TILE_CACHE_HEADER), "memory");
}

#[rstest]
#[case("/tiles/23/0/0")]
#[case("/tiles/3/8/0")]
#[case("/tiles/a/b/c")]
#[case("/tiles/6/0/40.mvt")]
#[tokio::test]
async fn invalid_and_empty_tiles_are_not_found(state: AppState, #[case] uri: &str) {
    assert_eq!(get(&state, uri).await.status(), StatusCode::NOT_FOUND);
}

#[rstest]
#[tokio::test]
async fn states_are_listed_with_population(state: AppState) {
    let response = get(&state, "/boundaries/states").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(names(&body), vec!["California", "Nevada"]);
    let california = &body["features"][0]["properties"];
    assert_eq!(california["geoid"], "06");
    assert_eq!(california["total"], 250 + 450);
}

#[rstest]
#[tokio::test]
async fn counties_are_listed_per_state(state: AppState) {
    let body = json_body(get(&state, "/boundaries/counties/06?tier=fine").await).await;
    assert_eq!(names(&body), vec!["Alameda", "Alpine"]);
    assert_eq!(body["features"][0]["properties"]["state"], "06");
}

#[rstest]
#[case("/boundaries/counties/41", StatusCode::NOT_FOUND)]
#[case("/boundaries/counties/06001", StatusCode::BAD_REQUEST)]
#[case("/boundaries/county/41039", StatusCode::NOT_FOUND)]
#[case("/boundaries/county/abc", StatusCode::BAD_REQUEST)]
#[case("/boundaries/tracts/41039", StatusCode::NOT_FOUND)]
#[case("/boundaries/states?tier=huge", StatusCode::BAD_REQUEST)]
#[tokio::test]
async fn boundary_lookups_reject_bad_ids(
    state: AppState,
    #[case] uri: &str,
    #[case] expected: StatusCode,
) {
    let response = get(&state, uri).await;
    assert_eq!(response.status(), expected);
}

#[rstest]
#[tokio::test]
async fn one_county_carries_its_totals(state: AppState) {
    let body = json_body(get(&state, "/boundaries/county/06001").await).await;
    let properties = &body["features"][0]["properties"];
    assert_eq!(properties["name"], "Alameda");
    assert_eq!(properties["total"], 250);
    assert_eq!(properties["adult"], 125);
}

#[rstest]
#[tokio::test]
async fn tracts_list_block_groups(state: AppState) {
    let body = json_body(get(&state, "/boundaries/tracts/06001").await).await;
    let features = body["features"].as_array().expect("features");
    assert_eq!(features.len(), 2);
    assert!(
        features
            .iter()
            .all(|feature| feature["properties"]["tract"] == "06001000100")
    );
}

#[rstest]
#[tokio::test]
async fn full_contexts_are_cacheable(state: AppState) {
    let response = get(&state, "/context/06001").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_value(&response, header::CACHE_CONTROL),
        "public, max-age=3600"
    );
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["type"], "FeatureCollection");
    assert_eq!(body["totals"]["total"], 250);
    assert_eq!(body["features"].as_array().map(Vec::len), Some(2));
}

#[rstest]
#[tokio::test]
async fn cache_busting_disables_client_caching(state: AppState) {
    let response = get(&state, "/context/06003?lite=true&cacheBust=abc").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_value(&response, header::CACHE_CONTROL), "no-store");
    let body = json_body(response).await;
    let points = body["points"].as_array().expect("points");
    assert!(points.iter().any(|point| point[3] == "32031"));
    assert_eq!(body["totals"]["units"], 2);
}

#[rstest]
#[case("/context/41039", StatusCode::NOT_FOUND)]
#[case("/context/06", StatusCode::BAD_REQUEST)]
#[case("/context/x", StatusCode::BAD_REQUEST)]
#[tokio::test]
async fn context_errors_map_to_statuses(
    state: AppState,
    #[case] uri: &str,
    #[case] expected: StatusCode,
) {
    let response = get(&state, uri).await;
    assert_eq!(response.status(), expected);
    let body = json_body(response).await;
    assert!(body["error"].is_string());
}

#[rstest]
#[tokio::test]
async fn seeding_runs_once_at_a_time(state: AppState) {
    let first = send(&state, "POST", "/admin/seed").await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(first).await["status"], "started");

    let second = send(&state, "POST", "/admin/seed").await;
    assert_eq!(second.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(second).await["status"], "already_running");

    let status = json_body(get(&state, "/status").await).await;
    assert_eq!(status["seeding"], true);
}

#[rstest]
#[tokio::test]
async fn status_reports_store_counts(state: AppState) {
    get(&state, "/tiles/6/10/24").await;
    let response = get(&state, "/status").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["layers"]["state"], 2);
    assert_eq!(body["layers"]["county"], 3);
    assert_eq!(body["layers"]["block_group"], 6);
    assert_eq!(body["cached_tiles"], 1);
    assert_eq!(body["memory_tiles"], 1);
    assert_eq!(body["seeding"], false);
}
