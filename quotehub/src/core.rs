use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use quotehub_cache::{
    AdaptiveSetOptions, CacheOrchestrator, ConcurrencyGovernor, SysinfoProbe, SystemProbe,
};
use quotehub_core::connector::{MarketStatusAdvisor, ProviderConnector};
use quotehub_core::{
    Clock, Gateway, MarketStatusEngine, MetricsBus, NullMetricsBus, ProviderRegistry,
    RecordTransformer, RuleSource, Store, SymbolTransformer, SystemClock, infer_market,
};
use quotehub_types::metrics::names;
use quotehub_types::{
    AccessFrequency, BrokerConfig, BrokerError, Capability, Market, MetricEvent, MetricType,
    ProviderAdvisory, QuoteEvent,
};

use crate::pipeline::{BatchSink, BatchingPipeline, CircuitBreaker};
use crate::router::ConnectionGauge;
use crate::stats::QueryStatistics;
use crate::streams::StreamBinding;
use crate::subscription::{SubscriptionManager, spawn_reaper};

/// The broker: REST request pipeline, streaming subscriptions, smart cache,
/// and the batching pipeline, wired over pluggable collaborators.
pub struct Broker {
    pub(crate) registry: Arc<ProviderRegistry>,
    pub(crate) market: Arc<MarketStatusEngine>,
    pub(crate) symbols: Arc<SymbolTransformer>,
    pub(crate) records: Arc<RecordTransformer>,
    pub(crate) cache: CacheOrchestrator,
    pub(crate) stats: Arc<QueryStatistics>,
    pub(crate) subscriptions: Arc<SubscriptionManager>,
    pub(crate) pipeline: Arc<BatchingPipeline>,
    pub(crate) gauge: Arc<ConnectionGauge>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) cfg: BrokerConfig,
    pub(crate) bindings: tokio::sync::Mutex<HashMap<(String, Capability), StreamBinding>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Builder for constructing a [`Broker`] with constructor wiring instead of
/// a container: every collaborator arrives as an interface.
pub struct BrokerBuilder {
    connectors: Vec<Arc<dyn ProviderConnector>>,
    store: Option<Arc<dyn Store>>,
    rules: Option<Arc<dyn RuleSource>>,
    gateway: Option<Arc<dyn Gateway>>,
    metrics: Option<Arc<dyn MetricsBus>>,
    clock: Arc<dyn Clock>,
    probe: Option<Arc<dyn SystemProbe>>,
    cfg: BrokerConfig,
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerBuilder {
    /// Builder with defaults: system clock, null metrics, env-independent
    /// config.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connectors: Vec::new(),
            store: None,
            rules: None,
            gateway: None,
            metrics: None,
            clock: Arc::new(SystemClock),
            probe: None,
            cfg: BrokerConfig::default(),
        }
    }

    /// Register a provider connector. Registration order is the final
    /// selection tie-break.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn ProviderConnector>) -> Self {
        self.connectors.push(connector);
        self
    }

    /// Attach the persistence collaborator. Required.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach the field-mapping rule source. Required.
    #[must_use]
    pub fn with_rules(mut self, rules: Arc<dyn RuleSource>) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Attach the WebSocket gateway used for broadcast fan-out. Optional:
    /// a REST-only deployment runs without one.
    #[must_use]
    pub fn with_gateway(mut self, gateway: Arc<dyn Gateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Attach a metrics bus; defaults to the null bus.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsBus>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Override the clock; tests pin time here.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the governor's system probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn SystemProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn with_config(mut self, cfg: BrokerConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Build the broker and spawn its background tasks (governor sampling,
    /// idle reaper, batching consumer).
    ///
    /// # Errors
    /// `Validation` when no connectors are registered or a required
    /// collaborator is missing.
    pub fn build(self) -> Result<Broker, BrokerError> {
        if self.connectors.is_empty() {
            return Err(BrokerError::validation(
                "no connectors registered; add at least one via with_connector(...)",
            ));
        }
        let store = self.store.ok_or_else(|| {
            BrokerError::validation("a store is required; attach one via with_store(...)")
        })?;
        let rules = self.rules.ok_or_else(|| {
            BrokerError::validation("a rule source is required; attach one via with_rules(...)")
        })?;
        let metrics: Arc<dyn MetricsBus> =
            self.metrics.unwrap_or_else(|| Arc::new(NullMetricsBus));

        let registry = Arc::new(ProviderRegistry::new(self.connectors));

        let mut market = MarketStatusEngine::new(Arc::clone(&self.clock));
        if let Some(advisor) = registry
            .all()
            .iter()
            .find(|c| c.as_market_status_advisor().is_some())
        {
            market = market.with_advisor(Arc::new(ConnectorAdvisor(Arc::clone(advisor))));
        }
        let market = Arc::new(market);

        let governor = Arc::new(ConcurrencyGovernor::new(
            self.cfg.governor.clone(),
            Arc::clone(&metrics),
        ));
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(SysinfoProbe::new()) as Arc<dyn SystemProbe>);
        let governor_task = Arc::clone(&governor).spawn(probe);

        let cache = CacheOrchestrator::new(
            store,
            Arc::clone(&market),
            Arc::clone(&self.clock),
            Arc::clone(&governor),
            self.cfg.cache.clone(),
        );

        let symbols = Arc::new(SymbolTransformer::new(Arc::clone(&metrics)));
        let records = Arc::new(RecordTransformer::new(rules));
        let stats = Arc::new(QueryStatistics::new(
            Arc::clone(&metrics),
            self.cfg.stats.clone(),
        ));

        let subscriptions = Arc::new(SubscriptionManager::new(
            Arc::clone(&self.clock),
            Arc::clone(&metrics),
        ));
        let reaper_task = spawn_reaper(Arc::clone(&subscriptions), self.cfg.subscription.clone());

        let sink = Arc::new(BrokerBatchSink {
            cache: cache.clone(),
            subscriptions: Arc::clone(&subscriptions),
            gateway: self.gateway,
            metrics: Arc::clone(&metrics),
        });
        let breaker = Arc::new(CircuitBreaker::new(self.cfg.breaker.clone()));
        let pipeline = Arc::new(BatchingPipeline::spawn(
            self.cfg.batching.clone(),
            Arc::clone(&records),
            breaker,
            sink,
            Arc::clone(&metrics),
        ));

        Ok(Broker {
            registry,
            market,
            symbols,
            records,
            cache,
            stats,
            subscriptions,
            pipeline,
            gauge: Arc::new(ConnectionGauge::new(self.cfg.rate_limit.clone())),
            clock: self.clock,
            cfg: self.cfg,
            bindings: tokio::sync::Mutex::new(HashMap::new()),
            tasks: std::sync::Mutex::new(vec![governor_task, reaper_task]),
        })
    }
}

impl Broker {
    /// Start building a broker.
    #[must_use]
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::new()
    }

    /// The subscription manager, for gateway-side integrations.
    #[must_use]
    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    /// The market status engine.
    #[must_use]
    pub fn market(&self) -> &Arc<MarketStatusEngine> {
        &self.market
    }

    /// The smart cache orchestrator.
    #[must_use]
    pub fn cache(&self) -> &CacheOrchestrator {
        &self.cache
    }

    /// The batching pipeline serving this broker's streams.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<BatchingPipeline> {
        &self.pipeline
    }

    /// Connections currently holding a request slot.
    #[must_use]
    pub fn active_connections(&self) -> i64 {
        self.gauge.active()
    }

    /// Stop background tasks, tear down stream bindings, and emit the
    /// shutdown marker.
    pub async fn shutdown(&self) {
        for task in self.tasks.lock().expect("tasks lock poisoned").drain(..) {
            task.abort();
        }
        let mut bindings = self.bindings.lock().await;
        for (_, binding) in bindings.drain() {
            binding.stop().await;
        }
        self.pipeline.abort();
        self.stats.shutdown();
    }
}

/// Adapter exposing a connector's advisory role as a standalone advisor for
/// the market status engine.
struct ConnectorAdvisor(Arc<dyn ProviderConnector>);

#[async_trait]
impl MarketStatusAdvisor for ConnectorAdvisor {
    async fn market_advisory(&self, market: Market) -> Result<ProviderAdvisory, BrokerError> {
        match self.0.as_market_status_advisor() {
            Some(advisor) => advisor.market_advisory(market).await,
            None => Err(BrokerError::upstream(
                self.0.name(),
                "connector lost its advisory role",
            )),
        }
    }
}

/// Pipeline callbacks wired to the broker's cache, subscriptions, and
/// metrics. Every failure is absorbed here: the pipeline never stops.
struct BrokerBatchSink {
    cache: CacheOrchestrator,
    subscriptions: Arc<SubscriptionManager>,
    gateway: Option<Arc<dyn Gateway>>,
    metrics: Arc<dyn MetricsBus>,
}

#[async_trait]
impl BatchSink for BrokerBatchSink {
    fn ensure_symbol_consistency(&self, record: &mut Value, event: &QuoteEvent) {
        if record.get("symbol").is_none()
            && let Some(symbol) = event.symbols.first()
            && let Some(obj) = record.as_object_mut()
        {
            obj.insert("symbol".to_string(), json!(symbol));
        }
    }

    async fn cache_data(&self, record: &Value, event: &QuoteEvent) {
        let Some(symbol) = event.symbols.first() else {
            return;
        };
        let key = format!(
            "stream:{}:{}:{symbol}",
            event.capability.as_str(),
            event.provider
        );
        let outcome = self
            .cache
            .set_with_adaptive_ttl(
                key,
                record.clone(),
                AdaptiveSetOptions {
                    classification: event.capability.storage_classification(),
                    symbol: Some(symbol.clone()),
                    access_frequency: AccessFrequency::Medium,
                    market: infer_market(&event.symbols),
                },
            )
            .await;
        if !outcome.success {
            debug!(
                target = "quotehub::pipeline",
                symbol, "stream record not cached; store rejected the write"
            );
        }
    }

    async fn broadcast_data(&self, record: &Value, event: &QuoteEvent, degraded: bool) {
        let Some(gateway) = &self.gateway else {
            return;
        };
        let payload = if degraded {
            json!({"degraded": true, "data": record})
        } else {
            record.clone()
        };
        for symbol in &event.symbols {
            if let Err(err) =
                self.subscriptions
                    .broadcast_to_symbol(symbol, &payload, gateway.as_ref())
            {
                // Counted in broadcast stats; not retried here.
                warn!(
                    target = "quotehub::pipeline",
                    symbol,
                    %err,
                    "stream broadcast failed"
                );
            }
        }
    }

    fn record_metrics(
        &self,
        provider: &str,
        capability: Capability,
        records: usize,
        elapsed_ms: u64,
    ) {
        self.metrics.emit(
            MetricEvent::new(
                "stream_pipeline",
                MetricType::Stream,
                names::STREAM_BATCH_PROCESSED,
                records as f64,
            )
            .with_tag("provider", provider)
            .with_tag("capability", capability.as_str())
            .with_tag("elapsed_ms", elapsed_ms.to_string()),
        );
    }
}
