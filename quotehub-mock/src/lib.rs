//! Deterministic test doubles for the quotehub workspace: a mock provider
//! connector with fixture data, an in-memory `Store` with fault injection,
//! a recording metrics bus, and a recording gateway.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use quotehub_core::connector::{
    MarketStatusAdvisor, ProviderConnector, ProviderFetchRequest, QuoteFetcher, QuoteStreamer,
    SymbolMapper,
};
use quotehub_core::gateway::Gateway;
use quotehub_core::store::{StorageMeta, Store};
use quotehub_core::stream::StreamHandle;
use quotehub_core::{InMemoryRuleSource, MetricsBus};
use quotehub_types::{
    ApiType, BrokerError, CachedRecord, Capability, Direction, FieldMapping, Market, MetricEvent,
    ProviderAdvisory, QuoteEvent, RuleListType, TransformKind,
};

mod fixtures;

pub use fixtures::default_rule_source;

/// Mock connector for CI-safe tests. Deterministic fixture data, a static
/// symbol-mapping table, and sentinel symbols for fault injection: `FAIL`
/// forces an upstream error, `TIMEOUT` sleeps past short deadlines.
pub struct MockConnector {
    name: &'static str,
    priority: u8,
    advisory: Mutex<Option<ProviderAdvisory>>,
    fetch_calls: AtomicUsize,
    stream_interval: std::time::Duration,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::named("longport")
    }
}

impl MockConnector {
    /// Connector registered under the default name "longport".
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector registered under an explicit name.
    #[must_use]
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            priority: 10,
            advisory: Mutex::new(None),
            fetch_calls: AtomicUsize::new(0),
            stream_interval: std::time::Duration::from_millis(5),
        }
    }

    /// Override the selection priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Script the market advisory returned by `market_advisory`.
    pub fn set_advisory(&self, advisory: Option<ProviderAdvisory>) {
        *self.advisory.lock().expect("advisory mutex poisoned") = advisory;
    }

    /// Fetches served so far; used to assert single-flight behaviour.
    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self, symbol: &str, capability: &str) -> Result<(), BrokerError> {
        if symbol == "FAIL" {
            return Err(BrokerError::upstream(
                self.name,
                format!("forced failure: {capability}"),
            ));
        }
        Ok(())
    }

    fn mapping_table() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("700.HK", "00700"),
            ("0005.HK", "00005"),
            ("9988.HK", "09988"),
            ("AAPL", "AAPL.US"),
            ("MSFT", "MSFT.US"),
            ("600519", "600519.SH"),
        ])
    }
}

impl ProviderConnector for MockConnector {
    fn name(&self) -> &'static str {
        self.name
    }
    fn priority(&self) -> u8 {
        self.priority
    }
    fn supports_market(&self, _market: Market) -> bool {
        true
    }
    fn as_quote_fetcher(&self) -> Option<&dyn QuoteFetcher> {
        Some(self as &dyn QuoteFetcher)
    }
    fn as_quote_streamer(&self) -> Option<&dyn QuoteStreamer> {
        Some(self as &dyn QuoteStreamer)
    }
    fn as_market_status_advisor(&self) -> Option<&dyn MarketStatusAdvisor> {
        Some(self as &dyn MarketStatusAdvisor)
    }
    fn as_symbol_mapper(&self) -> Option<&dyn SymbolMapper> {
        Some(self as &dyn SymbolMapper)
    }
}

#[async_trait]
impl QuoteFetcher for MockConnector {
    async fn fetch(&self, req: &ProviderFetchRequest) -> Result<Vec<Value>, BrokerError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let mut records = Vec::with_capacity(req.symbols.len());
        for symbol in &req.symbols {
            if symbol == "TIMEOUT" {
                // Long enough to trip short test deadlines, short enough to
                // not drag the suite.
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
            self.maybe_fail(symbol, req.capability.as_str())?;
            records.push(fixtures::raw_record(symbol));
        }
        Ok(records)
    }
}

#[async_trait]
impl QuoteStreamer for MockConnector {
    async fn stream_quotes(
        &self,
        symbols: &[String],
        capability: Capability,
    ) -> Result<(StreamHandle, tokio::sync::mpsc::Receiver<QuoteEvent>), BrokerError> {
        let (tx, rx) = tokio::sync::mpsc::channel(256);
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
        let provider = self.name;
        let symbols = symbols.to_vec();
        let interval = self.stream_interval;
        let task = tokio::spawn(async move {
            let mut seq = 0u64;
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        for symbol in &symbols {
                            let event = QuoteEvent {
                                raw: json!({"symbol": symbol, "last_done": 100.0 + seq as f64}),
                                provider: provider.to_string(),
                                capability,
                                arrived_at: chrono::Utc::now(),
                                symbols: vec![symbol.clone()],
                            };
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        seq += 1;
                    }
                }
            }
        });
        Ok((StreamHandle::new(task, stop_tx), rx))
    }
}

#[async_trait]
impl MarketStatusAdvisor for MockConnector {
    async fn market_advisory(&self, _market: Market) -> Result<ProviderAdvisory, BrokerError> {
        self.advisory
            .lock()
            .expect("advisory mutex poisoned")
            .ok_or_else(|| BrokerError::upstream(self.name, "advisory not scripted"))
    }
}

#[async_trait]
impl SymbolMapper for MockConnector {
    async fn map_symbols(
        &self,
        symbols: &[String],
        direction: Direction,
    ) -> Result<HashMap<String, String>, BrokerError> {
        let table = Self::mapping_table();
        let mut out = HashMap::new();
        for s in symbols {
            if s == "MAPFAIL" {
                return Err(BrokerError::upstream(self.name, "mapping backend down"));
            }
            let mapped = match direction {
                Direction::FromStandard => table.get(s.as_str()).map(|v| (*v).to_string()),
                Direction::ToStandard => table
                    .iter()
                    .find(|(_, v)| **v == s.as_str())
                    .map(|(k, _)| (*k).to_string()),
            };
            if let Some(mapped) = mapped {
                out.insert(s.clone(), mapped);
            }
        }
        Ok(out)
    }
}

/// In-memory `Store` with fault injection and call counters.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, CachedRecord>>,
    meta: Mutex<HashMap<String, StorageMeta>>,
    fail_puts: AtomicBool,
    fail_gets: AtomicBool,
    puts: AtomicUsize,
    gets: AtomicUsize,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `put` fail with a `Storage` error.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Make every `get`/`mget` fail with a `Storage` error.
    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    /// Writes accepted so far.
    #[must_use]
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Reads served so far (mget counts once).
    #[must_use]
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Metadata stored for a key, if any.
    #[must_use]
    pub fn meta_for(&self, key: &str) -> Option<StorageMeta> {
        self.meta.lock().expect("meta mutex poisoned").get(key).cloned()
    }

    /// Direct record access for assertions.
    #[must_use]
    pub fn record(&self, key: &str) -> Option<CachedRecord> {
        self.records
            .lock()
            .expect("records mutex poisoned")
            .get(key)
            .cloned()
    }

    /// Insert a record directly, bypassing the `Store` contract.
    pub fn seed(&self, record: CachedRecord) {
        self.records
            .lock()
            .expect("records mutex poisoned")
            .insert(record.key.clone(), record);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CachedRecord>, BrokerError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(BrokerError::storage("memory store read fault"));
        }
        Ok(self
            .records
            .lock()
            .expect("records mutex poisoned")
            .get(key)
            .cloned())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<CachedRecord>>, BrokerError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(BrokerError::storage("memory store read fault"));
        }
        let records = self.records.lock().expect("records mutex poisoned");
        Ok(keys.iter().map(|k| records.get(k).cloned()).collect())
    }

    async fn put(
        &self,
        record: CachedRecord,
        meta: Option<StorageMeta>,
    ) -> Result<(), BrokerError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(BrokerError::storage("memory store write fault"));
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        if let Some(meta) = meta {
            self.meta
                .lock()
                .expect("meta mutex poisoned")
                .insert(record.key.clone(), meta);
        }
        self.records
            .lock()
            .expect("records mutex poisoned")
            .insert(record.key.clone(), record);
        Ok(())
    }
}

/// Metrics bus that records every event for assertions.
#[derive(Default)]
pub struct RecordingMetricsBus {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingMetricsBus {
    /// Empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    #[must_use]
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().expect("events mutex poisoned").clone()
    }

    /// Events with the given metric name.
    #[must_use]
    pub fn named(&self, name: &str) -> Vec<MetricEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.metric_name == name)
            .collect()
    }
}

impl MetricsBus for RecordingMetricsBus {
    fn emit(&self, event: MetricEvent) {
        self.events.lock().expect("events mutex poisoned").push(event);
    }
}

/// Gateway that records pushes and can be switched unavailable or failing.
#[derive(Default)]
pub struct RecordingGateway {
    available: AtomicBool,
    fail_broadcasts: AtomicBool,
    sent: Mutex<Vec<(String, String, Value)>>,
}

impl RecordingGateway {
    /// Available, non-failing gateway.
    #[must_use]
    pub fn new() -> Self {
        let gw = Self::default();
        gw.available.store(true, Ordering::SeqCst);
        gw
    }

    /// Toggle availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make broadcasts return an error.
    pub fn fail_broadcasts(&self, fail: bool) {
        self.fail_broadcasts.store(fail, Ordering::SeqCst);
    }

    /// Everything pushed so far as `(room, event, payload)`.
    #[must_use]
    pub fn sent(&self) -> Vec<(String, String, Value)> {
        self.sent.lock().expect("sent mutex poisoned").clone()
    }
}

impl Gateway for RecordingGateway {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn broadcast_to_room(
        &self,
        room: &str,
        event: &str,
        payload: &Value,
    ) -> Result<bool, BrokerError> {
        if self.fail_broadcasts.load(Ordering::SeqCst) {
            return Err(BrokerError::gateway("forced broadcast failure"));
        }
        self.sent.lock().expect("sent mutex poisoned").push((
            room.to_string(),
            event.to_string(),
            payload.clone(),
        ));
        Ok(true)
    }
}

/// Rule source covering the mock provider's raw record shape for both
/// transport surfaces.
#[must_use]
pub fn rules_for(provider: &str) -> InMemoryRuleSource {
    let mut source = InMemoryRuleSource::new();
    for api_type in [ApiType::Rest, ApiType::Stream] {
        source.insert(provider, api_type, RuleListType::QuoteFields, quote_rules());
        source.insert(
            provider,
            api_type,
            RuleListType::BasicInfoFields,
            basic_info_rules(),
        );
        source.insert(provider, api_type, RuleListType::IndexFields, index_rules());
        source.insert(
            provider,
            api_type,
            RuleListType::MarketStatusFields,
            market_status_rules(),
        );
    }
    source
}

fn quote_rules() -> Vec<FieldMapping> {
    vec![
        FieldMapping::direct("symbol", "symbol").required(),
        FieldMapping::direct("last_done", "lastPrice")
            .with_fallbacks(vec!["price.last".to_string()]),
        FieldMapping::direct("open", "open"),
        FieldMapping::direct("high", "high"),
        FieldMapping::direct("low", "low"),
        FieldMapping::direct("volume", "volume"),
        FieldMapping::direct("turnover", "turnover"),
        FieldMapping::direct("timestamp", "timestamp"),
    ]
}

fn basic_info_rules() -> Vec<FieldMapping> {
    vec![
        FieldMapping::direct("symbol", "symbol").required(),
        FieldMapping::direct("name_en", "name"),
        FieldMapping::direct("lot_size", "lotSize"),
        FieldMapping::direct("currency", "currency"),
    ]
}

fn index_rules() -> Vec<FieldMapping> {
    vec![
        FieldMapping::direct("symbol", "symbol").required(),
        FieldMapping::direct("last_done", "lastPrice"),
        FieldMapping::direct("change_rate", "changeRate")
            .with_transform(TransformKind::Multiply, Some(100.0)),
    ]
}

fn market_status_rules() -> Vec<FieldMapping> {
    vec![
        FieldMapping::direct("market", "market").required(),
        FieldMapping::direct("status", "status"),
    ]
}
