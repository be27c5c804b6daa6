use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use quotehub::pipeline::{BatchSink, BatchingPipeline, CircuitBreaker};
use quotehub_core::{InMemoryRuleSource, RecordTransformer};
use quotehub_mock::RecordingMetricsBus;
use quotehub_types::metrics::names;
use quotehub_types::{
    ApiType, BatchingConfig, BreakerConfig, Capability, FieldMapping, QuoteEvent, RuleListType,
};

/// Sink that records everything it sees.
#[derive(Default)]
struct RecordingSink {
    broadcasts: Mutex<Vec<(Value, bool)>>,
    cached: Mutex<Vec<Value>>,
    batches: Mutex<Vec<usize>>,
}

#[async_trait]
impl BatchSink for RecordingSink {
    fn ensure_symbol_consistency(&self, record: &mut Value, event: &QuoteEvent) {
        if record.get("symbol").is_none()
            && let Some(symbol) = event.symbols.first()
            && let Some(obj) = record.as_object_mut()
        {
            obj.insert("symbol".to_string(), json!(symbol));
        }
    }

    async fn cache_data(&self, record: &Value, _event: &QuoteEvent) {
        self.cached.lock().unwrap().push(record.clone());
    }

    async fn broadcast_data(&self, record: &Value, _event: &QuoteEvent, degraded: bool) {
        self.broadcasts.lock().unwrap().push((record.clone(), degraded));
    }

    fn record_metrics(&self, _provider: &str, _capability: Capability, records: usize, _ms: u64) {
        self.batches.lock().unwrap().push(records);
    }
}

fn rules() -> Arc<RecordTransformer> {
    let mut source = InMemoryRuleSource::new();
    source.insert(
        "longport",
        ApiType::Stream,
        RuleListType::QuoteFields,
        vec![
            FieldMapping::direct("symbol", "symbol"),
            FieldMapping::direct("last_done", "lastPrice").required(),
        ],
    );
    Arc::new(RecordTransformer::new(Arc::new(source)))
}

fn event(provider: &str, payload: Value) -> QuoteEvent {
    QuoteEvent {
        raw: payload,
        provider: provider.to_string(),
        capability: Capability::StreamStockQuote,
        arrived_at: Utc::now(),
        symbols: vec!["700.HK".to_string()],
    }
}

fn spawn(
    cfg: BatchingConfig,
    breaker_cfg: BreakerConfig,
) -> (BatchingPipeline, Arc<RecordingSink>, Arc<RecordingMetricsBus>) {
    let sink = Arc::new(RecordingSink::default());
    let metrics = Arc::new(RecordingMetricsBus::new());
    let pipeline = BatchingPipeline::spawn(
        cfg,
        rules(),
        Arc::new(CircuitBreaker::new(breaker_cfg)),
        Arc::clone(&sink) as Arc<dyn BatchSink>,
        Arc::clone(&metrics) as Arc<dyn quotehub_core::MetricsBus>,
    );
    (pipeline, sink, metrics)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn well_formed_records_transform_and_fan_out_in_order() {
    let (pipeline, sink, _metrics) = spawn(BatchingConfig::default(), BreakerConfig::default());

    for i in 0..5 {
        pipeline.add_quote(event(
            "longport",
            json!({"symbol": "700.HK", "last_done": 100.0 + f64::from(i)}),
        ));
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    let broadcasts = sink.broadcasts.lock().unwrap().clone();
    assert_eq!(broadcasts.len(), 5);
    // Arrival order preserved within the (provider, capability) group.
    let prices: Vec<f64> = broadcasts
        .iter()
        .map(|(record, _)| record["lastPrice"].as_f64().unwrap())
        .collect();
    assert_eq!(prices, vec![100.0, 101.0, 102.0, 103.0, 104.0]);
    assert!(broadcasts.iter().all(|(_, degraded)| !degraded));
    assert_eq!(sink.cached.lock().unwrap().len(), 5);
    let batch_sizes = sink.batches.lock().unwrap().clone();
    assert_eq!(batch_sizes.iter().sum::<usize>(), 5);
    pipeline.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_records_fall_back_per_record() {
    let (pipeline, sink, metrics) = spawn(BatchingConfig::default(), BreakerConfig::default());

    pipeline.add_quote(event("longport", json!({"symbol": "700.HK", "last_done": 1.0})));
    // Missing the required last_done field.
    pipeline.add_quote(event("longport", json!({"symbol": "700.HK"})));
    pipeline.add_quote(event("longport", json!({"symbol": "700.HK", "last_done": 2.0})));
    tokio::time::sleep(Duration::from_millis(150)).await;

    let broadcasts = sink.broadcasts.lock().unwrap().clone();
    assert_eq!(broadcasts.len(), 3, "bad record degrades, never disappears");
    assert_eq!(broadcasts.iter().filter(|(_, degraded)| *degraded).count(), 1);
    assert_eq!(metrics.named(names::STREAM_PIPELINE_FALLBACK).len(), 1);
    // Transformed records were cached; the degraded one was not.
    assert_eq!(sink.cached.lock().unwrap().len(), 2);
    pipeline.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn open_breaker_routes_raw_records_through_the_fallback() {
    let breaker_cfg = BreakerConfig {
        consecutive_failures: 3,
        reset_timeout: Duration::from_secs(60),
        ..BreakerConfig::default()
    };
    let (pipeline, sink, _metrics) = spawn(BatchingConfig::default(), breaker_cfg);

    // Trip the breaker with malformed records, then send a good one.
    for _ in 0..3 {
        pipeline.add_quote(event("longport", json!({"symbol": "700.HK"})));
    }
    tokio::time::sleep(Duration::from_millis(120)).await;
    pipeline.add_quote(event(
        "longport",
        json!({"symbol": "700.HK", "last_done": 9.0}),
    ));
    tokio::time::sleep(Duration::from_millis(120)).await;

    let broadcasts = sink.broadcasts.lock().unwrap().clone();
    assert_eq!(broadcasts.len(), 4);
    // The good record still went out, but degraded: the breaker was open.
    let (last, degraded) = broadcasts.last().unwrap();
    assert!(*degraded);
    assert_eq!(last["last_done"], 9.0, "raw payload passes through untouched");
    pipeline.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_provider_rules_degrade_instead_of_crashing() {
    let (pipeline, sink, _metrics) = spawn(BatchingConfig::default(), BreakerConfig::default());
    pipeline.add_quote(event("itick", json!({"symbol": "700.HK", "last_done": 1.0})));
    tokio::time::sleep(Duration::from_millis(150)).await;

    let broadcasts = sink.broadcasts.lock().unwrap().clone();
    assert_eq!(broadcasts.len(), 1);
    assert!(broadcasts[0].1, "no rule list means the degraded path");
    pipeline.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sustained_load_speeds_up_the_interval_without_losing_quotes() {
    let cfg = BatchingConfig {
        adjustment_frequency_ms: 100,
        ..BatchingConfig::default()
    };
    let (pipeline, sink, metrics) = spawn(cfg.clone(), BreakerConfig::default());
    assert_eq!(pipeline.current_interval_ms(), 50);

    // Keep mean batch size above the high-load threshold (15) across a few
    // adjustment periods: 20 events every 25 ms is ~40 per 50 ms flush.
    for _ in 0..16 {
        for i in 0..20 {
            pipeline.add_quote(event(
                "longport",
                json!({"symbol": "700.HK", "last_done": f64::from(i)}),
            ));
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The first adjustment reacted to high load with the fast interval;
    // later samples may relax it again, but never outside the clamp.
    let adjustments = metrics.named(names::BATCH_INTERVAL_ADJUSTED);
    assert!(!adjustments.is_empty());
    assert_eq!(
        adjustments[0].tags.get("load_level").map(String::as_str),
        Some("high")
    );
    assert_eq!(
        adjustments[0].tags.get("new").map(String::as_str),
        Some("25")
    );
    let interval = pipeline.current_interval_ms();
    assert!(interval >= cfg.min_interval_ms && interval <= cfg.max_interval_ms);

    // No quote was lost across flushes.
    assert_eq!(sink.broadcasts.lock().unwrap().len(), 320);
    pipeline.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_pipeline_relaxes_to_the_slow_interval() {
    let cfg = BatchingConfig {
        adjustment_frequency_ms: 80,
        ..BatchingConfig::default()
    };
    let (pipeline, _sink, _metrics) = spawn(cfg.clone(), BreakerConfig::default());
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(pipeline.current_interval_ms(), cfg.low_load_interval_ms);
    pipeline.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interval_always_stays_inside_the_clamp() {
    let cfg = BatchingConfig {
        adjustment_frequency_ms: 60,
        high_load_interval_ms: 1,   // clamps up to min
        low_load_interval_ms: 9_999, // clamps down to max
        ..BatchingConfig::default()
    };
    let (pipeline, _sink, _metrics) = spawn(cfg.clone(), BreakerConfig::default());

    tokio::time::sleep(Duration::from_millis(250)).await;
    let interval = pipeline.current_interval_ms();
    assert!(interval >= cfg.min_interval_ms && interval <= cfg.max_interval_ms);
    pipeline.abort();
}
