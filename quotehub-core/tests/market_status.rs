use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use quotehub_core::connector::MarketStatusAdvisor;
use quotehub_core::{Clock, ManualClock, MarketStatusEngine};
use quotehub_types::{BrokerError, Market, MarketState, ProviderAdvisory, TtlMode};

struct ScriptedAdvisor {
    advisory: Option<ProviderAdvisory>,
    calls: AtomicUsize,
}

#[async_trait]
impl MarketStatusAdvisor for ScriptedAdvisor {
    async fn market_advisory(&self, _market: Market) -> Result<ProviderAdvisory, BrokerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.advisory
            .ok_or_else(|| BrokerError::upstream("scripted", "advisory unavailable"))
    }
}

fn clock_at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap(),
    ))
}

#[tokio::test]
async fn hk_weekend_state_and_ttls() {
    // Saturday afternoon UTC.
    let clock = clock_at(2026, 7, 4, 14, 0);
    let engine = MarketStatusEngine::new(clock);
    let status = engine.get(Market::Hk).await.unwrap();
    assert_eq!(status.state, MarketState::Weekend);
    assert!(status.realtime_ttl >= 60);
    assert_eq!(engine.recommended_ttl(Market::Hk, TtlMode::Realtime).await, 60);
    assert_eq!(
        engine.recommended_ttl(Market::Hk, TtlMode::Analytical).await,
        3_600
    );
}

#[tokio::test]
async fn agreement_raises_confidence() {
    // Wednesday 10:30 HKT.
    let clock = clock_at(2026, 7, 1, 2, 30);
    let advisor = Arc::new(ScriptedAdvisor {
        advisory: Some(ProviderAdvisory::Open),
        calls: AtomicUsize::new(0),
    });
    let engine = MarketStatusEngine::new(clock).with_advisor(advisor);
    let status = engine.get(Market::Hk).await.unwrap();
    assert_eq!(status.state, MarketState::Trading);
    assert!((status.confidence - 0.98).abs() < f64::EPSILON);
}

#[tokio::test]
async fn disagreement_lets_the_provider_win() {
    let clock = clock_at(2026, 7, 1, 2, 30);
    let advisor = Arc::new(ScriptedAdvisor {
        advisory: Some(ProviderAdvisory::Holiday),
        calls: AtomicUsize::new(0),
    });
    let engine = MarketStatusEngine::new(clock).with_advisor(advisor);
    let status = engine.get(Market::Hk).await.unwrap();
    assert_eq!(status.state, MarketState::Holiday);
    assert!(status.is_holiday);
    assert!((status.confidence - 0.85).abs() < f64::EPSILON);
}

#[tokio::test]
async fn advisory_failure_degrades_to_local() {
    let clock = clock_at(2026, 7, 1, 2, 30);
    let advisor = Arc::new(ScriptedAdvisor {
        advisory: None,
        calls: AtomicUsize::new(0),
    });
    let engine = MarketStatusEngine::new(clock).with_advisor(advisor);
    let status = engine.get(Market::Hk).await.unwrap();
    assert_eq!(status.state, MarketState::Trading);
    assert!((status.confidence - 0.9).abs() < f64::EPSILON);
}

#[tokio::test]
async fn batch_omits_unknown_markets_without_failing() {
    let clock = clock_at(2026, 7, 4, 14, 0);
    let engine = MarketStatusEngine::new(clock);
    let out = engine
        .batch(&[Market::Hk, Market::Us, Market::Unknown])
        .await;
    assert_eq!(out.len(), 2);
    assert!(out.contains_key(&Market::Hk));
    assert!(out.contains_key(&Market::Us));
}

#[tokio::test]
async fn status_is_cached_between_calls() {
    let clock = clock_at(2026, 7, 1, 2, 30);
    let advisor = Arc::new(ScriptedAdvisor {
        advisory: Some(ProviderAdvisory::Open),
        calls: AtomicUsize::new(0),
    });
    let engine = MarketStatusEngine::new(Arc::clone(&clock) as Arc<dyn Clock>)
        .with_advisor(Arc::clone(&advisor) as Arc<dyn MarketStatusAdvisor>);
    let _ = engine.get(Market::Hk).await.unwrap();
    let _ = engine.get(Market::Hk).await.unwrap();
    assert_eq!(advisor.calls.load(Ordering::SeqCst), 1, "second get was a cache hit");
}
