use std::sync::Arc;

use serde_json::Value;

use quotehub::{Broker, BrokerError, DataRequest};
use quotehub_mock::{MemoryStore, MockConnector, RecordingMetricsBus, default_rule_source};
use quotehub_types::metrics::names;
use quotehub_types::{BrokerConfig, RequestOptions};

struct Harness {
    broker: Broker,
    store: Arc<MemoryStore>,
    connector: Arc<MockConnector>,
    metrics: Arc<RecordingMetricsBus>,
}

fn harness() -> Harness {
    harness_with(BrokerConfig::default())
}

fn harness_with(cfg: BrokerConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let connector = Arc::new(MockConnector::new());
    let metrics = Arc::new(RecordingMetricsBus::new());
    let broker = Broker::builder()
        .with_connector(Arc::clone(&connector) as Arc<dyn quotehub_core::connector::ProviderConnector>)
        .with_store(Arc::clone(&store) as Arc<dyn quotehub_core::Store>)
        .with_rules(Arc::new(default_rule_source()))
        .with_metrics(Arc::clone(&metrics) as Arc<dyn quotehub_core::MetricsBus>)
        .with_config(cfg)
        .build()
        .unwrap();
    Harness {
        broker,
        store,
        connector,
        metrics,
    }
}

fn quote_request(symbols: &[&str]) -> DataRequest {
    DataRequest::new(
        symbols.iter().map(|s| (*s).to_string()).collect(),
        "get-stock-quote",
    )
}

/// The persist is fire-and-forget; poll until the write lands.
async fn wait_for_record(store: &MemoryStore, key: &str) -> quotehub_types::CachedRecord {
    for _ in 0..200 {
        if let Some(record) = store.record(key) {
            return record;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    panic!("record for {key} never landed");
}

#[tokio::test]
async fn mixed_market_quote_round_trip() {
    let h = harness();
    let response = h.broker.handle(quote_request(&["700.HK", "AAPL"])).await.unwrap();

    assert_eq!(response.metadata.provider, "longport");
    assert_eq!(response.data.len(), 2);
    assert!(!response.metadata.has_partial_failures);
    assert!(response.metadata.request_id.starts_with("req-"));
    // Transformed field names, not raw provider names.
    assert!(response.data[0].get("lastPrice").is_some());
    assert!(response.data[0].get("last_done").is_none());
    // The slot is back after the request.
    assert_eq!(h.broker.active_connections(), 0);
}

#[tokio::test]
async fn persisted_record_carries_metadata_tags() {
    let h = harness();
    let _ = h.broker.handle(quote_request(&["700.HK", "AAPL"])).await.unwrap();

    let key = "receiver:get-stock-quote:longport:700.HK,AAPL";
    let record = wait_for_record(&h.store, key).await;
    assert_eq!(record.ttl_seconds, 60);
    let meta = h.store.meta_for(key).expect("metadata tags stored");
    assert_eq!(meta.symbols, vec!["700.HK", "AAPL"]);
    assert!(!meta.request_id.is_empty());
}

#[tokio::test]
async fn a_record_failing_field_mapping_marks_partial_failures() {
    let h = harness();
    // The NOSYM fixture payload has no symbol field, so its required quote
    // mapping fails while AAPL maps cleanly.
    let response = h
        .broker
        .handle(quote_request(&["AAPL", "NOSYM"]))
        .await
        .unwrap();
    assert_eq!(response.data.len(), 1);
    assert_eq!(response.data[0]["symbol"], "AAPL");
    assert!(response.metadata.has_partial_failures);
}

#[tokio::test]
async fn every_record_failing_field_mapping_surfaces_a_transform_error() {
    let h = harness();
    let err = h.broker.handle(quote_request(&["NOSYM"])).await.unwrap_err();
    assert!(matches!(err, BrokerError::Transform(_)));
    assert_eq!(err.status_code(), 500);
    assert_eq!(h.broker.active_connections(), 0);
}

#[tokio::test]
async fn second_request_is_served_from_cache() {
    let h = harness();
    let _ = h.broker.handle(quote_request(&["AAPL"])).await.unwrap();
    let fetches_after_first = h.connector.fetch_calls();
    let _ = h.broker.handle(quote_request(&["AAPL"])).await.unwrap();
    assert_eq!(h.connector.fetch_calls(), fetches_after_first);
}

#[tokio::test]
async fn smart_cache_opt_out_always_fetches() {
    let h = harness();
    let mut req = quote_request(&["AAPL"]);
    req.options.use_smart_cache = false;
    let _ = h.broker.handle(req.clone()).await.unwrap();
    let _ = h.broker.handle(req).await.unwrap();
    assert_eq!(h.connector.fetch_calls(), 2);
    assert!(h.store.record("receiver:get-stock-quote:longport:AAPL").is_none());
}

#[tokio::test]
async fn validation_errors_map_to_400() {
    let h = harness();
    let err = h.broker.handle(quote_request(&[])).await.unwrap_err();
    assert!(matches!(err, BrokerError::Validation(_)));
    assert_eq!(err.status_code(), 400);
    assert_eq!(h.broker.active_connections(), 0);
}

#[tokio::test]
async fn unknown_capability_maps_to_404() {
    let h = harness();
    let req = DataRequest::new(vec!["AAPL".into()], "get-stock-orders");
    let err = h.broker.handle(req).await.unwrap_err();
    assert!(matches!(err, BrokerError::NotFound { .. }));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn unknown_preferred_provider_maps_to_404() {
    let h = harness();
    let mut req = quote_request(&["AAPL"]);
    req.options.preferred_provider = Some("iex".to_string());
    let err = h.broker.handle(req).await.unwrap_err();
    assert!(matches!(err, BrokerError::NotFound { .. }));
}

#[tokio::test]
async fn upstream_failure_releases_the_connection_slot() {
    let h = harness();
    let err = h.broker.handle(quote_request(&["FAIL"])).await.unwrap_err();
    assert!(matches!(err, BrokerError::Upstream { .. }));
    assert_eq!(
        h.broker.active_connections(),
        0,
        "gauge returns to baseline on the error path"
    );
}

#[tokio::test]
async fn storage_write_fault_never_fails_the_request() {
    let h = harness();
    h.store.fail_puts(true);
    let response = h.broker.handle(quote_request(&["AAPL"])).await.unwrap();
    assert_eq!(response.data.len(), 1);
    assert_eq!(h.broker.active_connections(), 0);
}

#[tokio::test]
async fn storage_read_fault_never_fails_the_request() {
    let h = harness();
    h.store.fail_gets(true);
    let response = h.broker.handle(quote_request(&["AAPL"])).await.unwrap();
    assert_eq!(response.data.len(), 1);
}

#[tokio::test]
async fn rate_limit_exhaustion_maps_to_429() {
    let mut cfg = BrokerConfig::default();
    cfg.rate_limit.max_connections = 1;
    let h = harness_with(cfg);
    let _ = h.broker.handle(quote_request(&["AAPL"])).await.unwrap();
    let err = h.broker.handle(quote_request(&["AAPL"])).await.unwrap_err();
    assert!(matches!(err, BrokerError::RateLimited { .. }));
    assert_eq!(err.status_code(), 429);
}

#[tokio::test]
async fn streaming_capability_is_rejected_on_the_rest_surface() {
    let h = harness();
    let req = DataRequest::new(vec!["AAPL".into()], "stream-stock-quote");
    let err = h.broker.handle(req).await.unwrap_err();
    assert!(matches!(err, BrokerError::Validation(_)));
}

#[tokio::test]
async fn timeout_option_bounds_the_provider_fetch() {
    let h = harness();
    let req = DataRequest {
        symbols: vec!["TIMEOUT".into()],
        receiver_type: "get-stock-quote".into(),
        options: RequestOptions {
            timeout_ms: Some(20),
            use_smart_cache: true,
            ..RequestOptions::default()
        },
    };
    let err = h.broker.handle(req).await.unwrap_err();
    assert!(matches!(err, BrokerError::UpstreamTimeout { .. }));
    assert_eq!(h.broker.active_connections(), 0);
}

#[tokio::test]
async fn every_request_emits_a_query_statistic() {
    let h = harness();
    let _ = h.broker.handle(quote_request(&["AAPL"])).await.unwrap();
    let events = h.metrics.named("handle_request");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tags.get("outcome").map(String::as_str), Some("ok"));
}

#[tokio::test]
async fn shutdown_emits_the_service_marker() {
    let h = harness();
    h.broker.shutdown().await;
    assert_eq!(h.metrics.named(names::SERVICE_SHUTDOWN).len(), 1);
}

#[tokio::test]
async fn concurrent_identical_requests_coalesce_upstream() {
    let h = harness();
    let broker = Arc::new(h.broker);
    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.handle(quote_request(&["700.HK"])).await })
        })
        .collect();
    let mut payloads: Vec<Value> = Vec::new();
    for task in tasks {
        let response = task.await.unwrap().unwrap();
        payloads.push(Value::Array(response.data));
    }
    assert_eq!(h.connector.fetch_calls(), 1, "single-flight across callers");
    assert!(payloads.windows(2).all(|w| w[0] == w[1]));
}
