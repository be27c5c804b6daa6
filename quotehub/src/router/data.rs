use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};

use quotehub_cache::{FetchFn, SmartCacheRequest};
use quotehub_core::connector::{ProviderConnector, ProviderFetchRequest};
use quotehub_core::store::StorageMeta;
use quotehub_core::{RecordTransformer, SymbolTransformer, infer_market};
use quotehub_types::validation::validate_data_request;
use quotehub_types::{
    ApiType, BrokerError, CacheStrategy, Capability, DataRequest, DataResponse, ResponseMeta,
};

use crate::core::Broker;

/// Symbol count above which persisted records get the longer TTL.
const LARGE_BATCH_SYMBOLS: usize = 20;

/// Storage TTL for persisted REST payloads: 60 s, stretched to 120 s for
/// large symbol batches.
const fn calculate_storage_cache_ttl(symbol_count: usize) -> u64 {
    if symbol_count > LARGE_BATCH_SYMBOLS {
        120
    } else {
        60
    }
}

fn new_request_id() -> String {
    format!("req-{:016x}", rand::random::<u64>())
}

impl Broker {
    /// Handle a single-shot data request.
    ///
    /// Validate, select a provider, then resolve through the smart cache;
    /// the miss path transforms symbols, fetches, applies field mappings,
    /// and persists. The request slot taken up front is released on every
    /// exit path by its guard, including panics.
    ///
    /// # Errors
    /// `Validation` for bad input shapes, `NotFound` for unknown
    /// capabilities or providers, `RateLimited` when the window budget is
    /// exhausted, and upstream failures from the fetch itself. Storage
    /// faults never surface.
    pub async fn handle(&self, req: DataRequest) -> Result<DataResponse, BrokerError> {
        let started = Instant::now();
        let _slot = self.gauge.acquire()?;
        let result = self.handle_inner(req, started).await;

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut tags = BTreeMap::new();
        tags.insert(
            "outcome".to_string(),
            if result.is_ok() { "ok" } else { "error" }.to_string(),
        );
        if let Ok(response) = &result {
            tags.insert(
                "capability".to_string(),
                response.metadata.capability.as_str().to_string(),
            );
            tags.insert("provider".to_string(), response.metadata.provider.clone());
        }
        self.stats.record_query("handle_request", elapsed_ms, tags);
        result
    }

    async fn handle_inner(
        &self,
        req: DataRequest,
        started: Instant,
    ) -> Result<DataResponse, BrokerError> {
        let warnings = validate_data_request(&req).into_result()?;
        for warning in warnings {
            debug!(target = "quotehub::router", warning, "request validation warning");
        }

        let capability = Capability::parse(req.receiver_type.trim())
            .ok_or_else(|| BrokerError::not_found(format!("capability {}", req.receiver_type)))?;
        if capability.is_streaming() {
            return Err(BrokerError::validation(format!(
                "{capability} is a streaming capability; use a stream subscription"
            )));
        }

        let symbols: Vec<String> = req.symbols.iter().map(|s| s.trim().to_string()).collect();
        let market = infer_market(&symbols);
        let provider = self.registry.select(
            capability,
            market,
            req.options.preferred_provider.as_deref(),
        )?;

        let request_id = new_request_id();
        let storage_key = format!(
            "receiver:{capability}:{}:{}",
            provider.name(),
            symbols.join(",")
        );
        let strategy = if req.options.use_smart_cache {
            req.options
                .strategy
                .unwrap_or(self.cfg.cache.default_strategy)
        } else {
            CacheStrategy::NoCache
        };

        let partial_failures = Arc::new(AtomicBool::new(false));
        let fetch = self.rest_fetch_fn(
            Arc::clone(&provider),
            capability,
            symbols.clone(),
            &req,
            request_id.clone(),
            Arc::clone(&partial_failures),
        );

        let mut cache_req = SmartCacheRequest::new(storage_key, market, fetch);
        cache_req.strategy = strategy;
        cache_req.provider = provider.name().to_string();
        cache_req.timeout = Some(req.options.timeout_or(self.cfg.cache.fetch_timeout));
        cache_req.ttl_override = Some(calculate_storage_cache_ttl(symbols.len()));
        cache_req.meta = Some(StorageMeta {
            symbols: symbols.clone(),
            request_id: request_id.clone(),
            transformed_at: self.clock.now_utc(),
            classification: capability.storage_classification(),
            market,
        });

        let outcome = self.cache.get_with_smart_cache(cache_req).await?;
        if let Some(absorbed) = &outcome.error {
            warn!(
                target = "quotehub::router",
                request_id,
                error = %absorbed,
                "operational fault absorbed while serving the request"
            );
        }

        let data = match outcome.data {
            Value::Array(records) => records,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        Ok(DataResponse {
            data,
            metadata: ResponseMeta {
                provider: provider.name().to_string(),
                capability,
                request_id,
                processing_time_ms: u64::try_from(started.elapsed().as_millis())
                    .unwrap_or(u64::MAX),
                has_partial_failures: partial_failures.load(Ordering::SeqCst),
            },
        })
    }

    /// Build the miss-path closure: symbol transform, provider fetch, field
    /// transform. Records are mapped one by one so a single bad record is
    /// dropped and flagged as a partial failure instead of failing the
    /// request; only a batch where every record fails surfaces a transform
    /// error. Persistence happens in the orchestrator's store step with the
    /// metadata attached to the request.
    fn rest_fetch_fn(
        &self,
        provider: Arc<dyn ProviderConnector>,
        capability: Capability,
        symbols: Vec<String>,
        req: &DataRequest,
        request_id: String,
        partial_failures: Arc<AtomicBool>,
    ) -> FetchFn {
        let transformer: Arc<SymbolTransformer> = Arc::clone(&self.symbols);
        let records: Arc<RecordTransformer> = Arc::clone(&self.records);
        let timeout = req.options.timeout_or(self.cfg.cache.fetch_timeout);
        let fields = req.options.fields.clone();
        let realtime = req.options.realtime;

        Arc::new(move || {
            let provider = Arc::clone(&provider);
            let transformer = Arc::clone(&transformer);
            let records = Arc::clone(&records);
            let symbols = symbols.clone();
            let request_id = request_id.clone();
            let fields = fields.clone();
            let partial_failures = Arc::clone(&partial_failures);
            Box::pin(async move {
                let prepared = transformer.transform_for_provider(&provider, &symbols).await?;
                let fetcher = provider.as_quote_fetcher().ok_or_else(|| {
                    BrokerError::not_found(format!(
                        "provider {} cannot serve {capability}",
                        provider.name()
                    ))
                })?;
                let raw = fetcher
                    .fetch(&ProviderFetchRequest {
                        capability,
                        symbols: prepared.symbols,
                        api_type: ApiType::Rest,
                        request_id,
                        timeout,
                        fields,
                        realtime,
                    })
                    .await?;

                let mut transformed = Vec::with_capacity(raw.len());
                let mut failed_records = 0usize;
                for record in &raw {
                    match records.transform_record(
                        provider.name(),
                        ApiType::Rest,
                        capability.rule_list_type(),
                        record,
                    ) {
                        Ok(mapped) => transformed.push(mapped),
                        Err(err) => {
                            failed_records += 1;
                            warn!(
                                target = "quotehub::router",
                                provider = provider.name(),
                                %err,
                                "record dropped from response; field mapping failed"
                            );
                        }
                    }
                }
                if transformed.is_empty() && !raw.is_empty() {
                    return Err(BrokerError::transform(format!(
                        "all {failed_records} records failed field mapping"
                    )));
                }
                if failed_records > 0 || transformed.len() < symbols.len() {
                    partial_failures.store(true, Ordering::SeqCst);
                }
                Ok(Value::Array(transformed))
            })
        })
    }
}
