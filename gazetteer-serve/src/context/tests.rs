use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;

use rstest::{fixture, rstest};

use super::*;

const SLOW: Duration = Duration::from_millis(250);

/// Source answering with empty contexts after a per-region delay.
#[derive(Default)]
struct StubSource {
    delays: HashMap<GeoId, Duration>,
    calls: AtomicUsize,
}

impl StubSource {
    fn slow(regions: &[&str]) -> Self {
        Self {
            delays: regions.iter().map(|raw| (id(raw), SLOW)).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ContextSource for StubSource {
    fn load(&self, region: &GeoId, mode: ContextMode) -> Result<ContextPayload, ContextError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(region) {
            std::thread::sleep(*delay);
        }
        if region.as_str() == "41039" {
            return Err(ContextError::UnknownRegion {
                region: region.clone(),
            });
        }
        Ok(match mode {
            ContextMode::Full => ContextPayload::Full(Arc::new(FullContext {
                kind: "FeatureCollection",
                region: region.clone(),
                features: Vec::new(),
                totals: ContextTotals::default(),
            })),
            ContextMode::Lite => ContextPayload::Lite(Arc::new(LiteContext {
                region: region.clone(),
                buffer_m: DEFAULT_LITE_BUFFER_M,
                points: Vec::new(),
                totals: ContextTotals::default(),
            })),
        })
    }
}

fn id(raw: &str) -> GeoId {
    raw.parse().expect("county id")
}

fn aggregator(source: &Arc<StubSource>, config: ContextConfig) -> ContextAggregator {
    let source: Arc<dyn ContextSource> = source.clone();
    ContextAggregator::new(source, config)
}

#[fixture]
fn config() -> ContextConfig {
    ContextConfig::default().with_timeouts(Duration::from_secs(5), Duration::from_secs(5))
}

fn current_region(aggregator: &ContextAggregator) -> Option<String> {
    aggregator
        .current()
        .map(|current| current.payload.region().to_string())
}

#[rstest]
#[tokio::test]
async fn concurrent_requests_share_one_fetch(config: ContextConfig) {
    let source = Arc::new(StubSource::slow(&["06001"]));
    let aggregator = aggregator(&source, config);
    let region = id("06001");

    let (first, second) = tokio::join!(
        aggregator.context(&region, ContextMode::Full),
        aggregator.context(&region, ContextMode::Full),
    );
    let (first, second) = (first.expect("first"), second.expect("second"));

    assert_eq!(source.calls(), 1);
    assert_eq!(first.outcome.status(), "ok");
    assert_eq!(first.outcome, second.outcome);
    assert!(!first.published);
    assert!(second.published);
    assert_eq!(aggregator.in_flight(), 0);
}

#[rstest]
#[tokio::test]
async fn resolved_contexts_are_reused(config: ContextConfig) {
    let source = Arc::new(StubSource::default());
    let aggregator = aggregator(&source, config);
    let region = id("06003");

    aggregator
        .context(&region, ContextMode::Lite)
        .await
        .expect("first");
    let again = aggregator
        .context(&region, ContextMode::Lite)
        .await
        .expect("second");

    assert_eq!(source.calls(), 1);
    assert_eq!(again.sequence, 2);
    assert!(again.published);
    assert_eq!(aggregator.cached(), 1);
}

#[rstest]
#[tokio::test]
async fn late_answers_to_older_requests_are_not_published(config: ContextConfig) {
    let source = Arc::new(StubSource::slow(&["06001"]));
    let aggregator = aggregator(&source, config.with_cancel_superseded(false));
    let (slow, fast) = (id("06001"), id("06003"));

    let (older, newer) = tokio::join!(
        aggregator.context(&slow, ContextMode::Full),
        aggregator.context(&fast, ContextMode::Full),
    );
    let (older, newer) = (older.expect("older"), newer.expect("newer"));

    assert_eq!(older.outcome.status(), "ok");
    assert!(!older.published);
    assert!(newer.published);
    assert_eq!(current_region(&aggregator).as_deref(), Some("06003"));
}

#[rstest]
#[tokio::test]
async fn newer_requests_cancel_other_fetches(config: ContextConfig) {
    let source = Arc::new(StubSource::slow(&["06001"]));
    let aggregator = aggregator(&source, config);
    let (slow, fast) = (id("06001"), id("06003"));

    let (older, newer) = tokio::join!(
        aggregator.context(&slow, ContextMode::Full),
        aggregator.context(&fast, ContextMode::Lite),
    );
    let (older, newer) = (older.expect("older"), newer.expect("newer"));

    assert_eq!(older.outcome, ContextOutcome::Cancelled);
    assert!(!older.published);
    assert_eq!(newer.outcome.status(), "ok");
    assert_eq!(current_region(&aggregator).as_deref(), Some("06003"));
    assert_eq!(aggregator.cached(), 1);
}

#[rstest]
#[tokio::test]
async fn lite_contexts_never_replace_full_ones(config: ContextConfig) {
    let source = Arc::new(StubSource::default());
    let aggregator = aggregator(&source, config);
    let region = id("06001");

    let full = aggregator
        .context(&region, ContextMode::Full)
        .await
        .expect("full");
    let lite = aggregator
        .context(&region, ContextMode::Lite)
        .await
        .expect("lite");

    assert!(full.published);
    assert_eq!(lite.outcome.status(), "ok");
    assert!(!lite.published);
    let current = aggregator.current().expect("current");
    assert_eq!(current.payload.mode(), ContextMode::Full);
    assert_eq!(current.sequence, full.sequence);
}

#[rstest]
#[tokio::test]
async fn slow_fetches_time_out_softly() {
    let source = Arc::new(StubSource::slow(&["06001"]));
    let config =
        ContextConfig::default().with_timeouts(Duration::from_millis(20), Duration::from_secs(5));
    let aggregator = aggregator(&source, config);

    let response = aggregator
        .context(&id("06001"), ContextMode::Lite)
        .await
        .expect("soft outcome");

    assert_eq!(response.outcome, ContextOutcome::TimedOut);
    assert_eq!(response.outcome.status(), "timeout");
    assert!(!response.published);
    assert_eq!(aggregator.cached(), 0);
    assert!(aggregator.current().is_none());
}

#[rstest]
#[tokio::test]
async fn failures_are_retried_on_the_next_request(config: ContextConfig) {
    let source = Arc::new(StubSource::default());
    let aggregator = aggregator(&source, config);
    let missing = id("41039");

    for _ in 0..2 {
        let err = aggregator
            .context(&missing, ContextMode::Full)
            .await
            .expect_err("unknown county");
        assert!(matches!(err, ContextError::UnknownRegion { .. }));
    }
    assert_eq!(source.calls(), 2);
    assert_eq!(aggregator.cached(), 0);
    assert_eq!(aggregator.in_flight(), 0);
}
