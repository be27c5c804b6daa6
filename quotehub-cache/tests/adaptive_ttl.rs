use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;

use quotehub_cache::{AdaptiveSetOptions, CacheOrchestrator, ConcurrencyGovernor};
use quotehub_core::{Clock, ManualClock, MarketStatusEngine, NullMetricsBus};
use quotehub_mock::MemoryStore;
use quotehub_types::{
    AccessFrequency, CacheConfig, CacheStrategy, GovernorConfig, Market, StorageClassification,
};

fn harness() -> (CacheOrchestrator, Arc<MemoryStore>) {
    // Weekend so the realtime base TTL is 60 s.
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 7, 4, 8, 0, 0).unwrap(),
    ));
    let store = Arc::new(MemoryStore::new());
    let market = Arc::new(MarketStatusEngine::new(Arc::clone(&clock) as Arc<dyn Clock>));
    let governor = Arc::new(ConcurrencyGovernor::new(
        GovernorConfig::default(),
        Arc::new(NullMetricsBus),
    ));
    let orchestrator = CacheOrchestrator::new(
        Arc::clone(&store) as Arc<dyn quotehub_core::Store>,
        market,
        Arc::clone(&clock) as Arc<dyn Clock>,
        governor,
        CacheConfig::default(),
    );
    (orchestrator, store)
}

fn opts(frequency: AccessFrequency) -> AdaptiveSetOptions {
    AdaptiveSetOptions {
        classification: StorageClassification::StockQuote,
        symbol: Some("700.HK".to_string()),
        access_frequency: frequency,
        market: Market::Hk,
    }
}

#[tokio::test]
async fn low_frequency_stretches_the_ttl() {
    let (orchestrator, store) = harness();
    let out = orchestrator
        .set_with_adaptive_ttl("adaptive:low", json!({"px": 1.0}), opts(AccessFrequency::Low))
        .await;
    assert!(out.success);
    assert_eq!(out.ttl, 240, "60 s realtime base x4");
    assert_eq!(out.strategy, CacheStrategy::Adaptive);
    assert_eq!(store.record("adaptive:low").unwrap().ttl_seconds, 240);
}

#[tokio::test]
async fn high_frequency_halves_the_ttl() {
    let (orchestrator, _store) = harness();
    let out = orchestrator
        .set_with_adaptive_ttl("adaptive:high", json!({}), opts(AccessFrequency::High))
        .await;
    assert_eq!(out.ttl, 30);
}

#[tokio::test]
async fn analytical_classes_use_the_analytical_base() {
    let (orchestrator, _store) = harness();
    let mut options = opts(AccessFrequency::Medium);
    options.classification = StorageClassification::StockBasicInfo;
    let out = orchestrator
        .set_with_adaptive_ttl("adaptive:info", json!({}), options)
        .await;
    // Weekend analytical base is 3600 s; medium keeps it, clamp holds it.
    assert_eq!(out.ttl, 3_600);
}

#[tokio::test]
async fn ttl_clamp_bounds_the_scaling() {
    let (orchestrator, _store) = harness();
    let out = orchestrator
        .set_with_adaptive_ttl("adaptive:clamped", json!({}), {
            let mut o = opts(AccessFrequency::Low);
            o.classification = StorageClassification::StockBasicInfo;
            o
        })
        .await;
    // 3600 x4 clamps back to the 3600 s ceiling.
    assert_eq!(out.ttl, 3_600);
}

#[tokio::test]
async fn store_fault_reports_failure_without_raising() {
    let (orchestrator, store) = harness();
    store.fail_puts(true);
    let out = orchestrator
        .set_with_adaptive_ttl("adaptive:down", json!({}), opts(AccessFrequency::Medium))
        .await;
    assert!(!out.success);
    assert_eq!(out.strategy, CacheStrategy::Adaptive);
}
