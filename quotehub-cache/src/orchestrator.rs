use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

use quotehub_core::store::StorageMeta;
use quotehub_core::{Clock, MarketStatusEngine, Store};
use quotehub_types::{
    AccessFrequency, BrokerError, CacheConfig, CacheStrategy, CachedRecord, Market, MarketState,
    StorageClassification, TtlMode,
};

use crate::governor::ConcurrencyGovernor;
use crate::strategy::{classify_frequency, dynamic_ttl};

/// Future produced by a fetch closure.
pub type FetchFuture = Pin<Box<dyn Future<Output = Result<Value, BrokerError>> + Send>>;
/// Fetch closure run on cache misses. Cloned freely: background refresh and
/// single-flight both hold one.
pub type FetchFn = Arc<dyn Fn() -> FetchFuture + Send + Sync>;

/// One smart-cache lookup.
#[derive(Clone)]
pub struct SmartCacheRequest {
    /// Storage key the result lives under.
    pub cache_key: String,
    /// Requested strategy; `MarketAware` resolves against the market state.
    pub strategy: CacheStrategy,
    /// Market driving TTL recommendations.
    pub market: Market,
    /// Provider label used in timeout errors.
    pub provider: String,
    /// Closure that produces fresh data on a miss.
    pub fetch: FetchFn,
    /// Fetch deadline; the config default applies when absent.
    pub timeout: Option<Duration>,
    /// Metadata tags written alongside a stored result.
    pub meta: Option<StorageMeta>,
    /// Fixed TTL for stored results, seconds; overrides the strategy TTL.
    pub ttl_override: Option<u64>,
}

impl SmartCacheRequest {
    /// Request with the default strategy and no explicit deadline.
    pub fn new(cache_key: impl Into<String>, market: Market, fetch: FetchFn) -> Self {
        Self {
            cache_key: cache_key.into(),
            strategy: CacheStrategy::StrongTimeliness,
            market,
            provider: String::from("unknown"),
            fetch,
            timeout: None,
            meta: None,
            ttl_override: None,
        }
    }
}

/// Outcome envelope of a smart-cache lookup.
#[derive(Debug, Clone)]
pub struct SmartCacheOutcome {
    /// The payload served.
    pub data: Value,
    /// True when served from a fresh stored record.
    pub hit: bool,
    /// Freshness remaining for hits, seconds.
    pub ttl_remaining: Option<u64>,
    /// TTL written for misses that stored, seconds.
    pub dynamic_ttl: Option<u64>,
    /// Strategy that was applied (post market-aware resolution).
    pub strategy: CacheStrategy,
    /// Storage key consulted.
    pub storage_key: String,
    /// Instant the outcome was assembled.
    pub timestamp: DateTime<Utc>,
    /// Store lookup fault absorbed while serving; fetch failures surface
    /// as errors, and persist faults are logged out of band.
    pub error: Option<String>,
}

/// Options for [`CacheOrchestrator::set_with_adaptive_ttl`].
#[derive(Debug, Clone)]
pub struct AdaptiveSetOptions {
    /// Data classification; quote-shaped data gets realtime base TTLs.
    pub classification: StorageClassification,
    /// Symbol tag for telemetry.
    pub symbol: Option<String>,
    /// Access frequency band scaling the TTL.
    pub access_frequency: AccessFrequency,
    /// Market driving the base TTL.
    pub market: Market,
}

/// Outcome of an adaptive set.
#[derive(Debug, Clone)]
pub struct AdaptiveSetOutcome {
    /// False when the store rejected the write.
    pub success: bool,
    /// TTL written, seconds.
    pub ttl: u64,
    /// Always `Adaptive`.
    pub strategy: CacheStrategy,
}

type FlightResult = Result<(Value, u64), BrokerError>;
type FlightReceiver = watch::Receiver<Option<FlightResult>>;

/// Strategy-dispatched cache over the `Store` contract.
///
/// Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct CacheOrchestrator {
    store: Arc<dyn Store>,
    market: Arc<MarketStatusEngine>,
    clock: Arc<dyn Clock>,
    pub(crate) governor: Arc<ConcurrencyGovernor>,
    cfg: CacheConfig,
    inflight: Arc<Mutex<HashMap<String, FlightReceiver>>>,
    // Per-key access counts over a five-minute window; drives the adaptive
    // strategy's frequency band.
    access: moka::sync::Cache<String, Arc<std::sync::atomic::AtomicU32>>,
}

impl CacheOrchestrator {
    /// Wire an orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        market: Arc<MarketStatusEngine>,
        clock: Arc<dyn Clock>,
        governor: Arc<ConcurrencyGovernor>,
        cfg: CacheConfig,
    ) -> Self {
        Self {
            store,
            market,
            clock,
            governor,
            cfg,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            access: moka::sync::Cache::builder()
                .max_capacity(100_000)
                .time_to_live(Duration::from_secs(300))
                .build(),
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) const fn config(&self) -> &CacheConfig {
        &self.cfg
    }

    /// Strategy-dispatched lookup.
    ///
    /// Hits return the stored record with its remaining TTL. Misses run the
    /// fetch closure — under a single-flight guard for the timeliness
    /// strategies — return fresh data with `hit = false`, and persist it in
    /// the background (except `NoCache`). Store faults never fail the call
    /// when the fetch can produce fresh data: lookup faults are carried in
    /// the outcome's `error`, write faults are logged.
    ///
    /// # Errors
    /// Fetch failures and deadline overruns surface; concurrent waiters of
    /// the same flight receive the same error.
    pub async fn get_with_smart_cache(
        &self,
        req: SmartCacheRequest,
    ) -> Result<SmartCacheOutcome, BrokerError> {
        let strategy = self.resolve_strategy(req.strategy, req.market).await;
        let now = self.clock.now_utc();

        if strategy == CacheStrategy::NoCache {
            let data = self.run_fetch(&req).await?;
            return Ok(self.outcome(&req, strategy, data, false, None, None, None));
        }

        if req.strategy == CacheStrategy::Adaptive {
            self.bump_access(&req.cache_key);
        }

        let existing = match self.store.get(&req.cache_key).await {
            Ok(existing) => existing,
            Err(err) => {
                // Storage is down; serve fresh data and absorb the fault.
                warn!(
                    target = "quotehub::cache",
                    key = %req.cache_key,
                    %err,
                    "store lookup failed; falling back to direct fetch"
                );
                let data = self.run_fetch(&req).await?;
                return Ok(self.outcome(
                    &req,
                    strategy,
                    data,
                    false,
                    None,
                    None,
                    Some(err.to_string()),
                ));
            }
        };

        if let Some(record) = existing {
            if record.is_fresh(now) {
                debug!(target = "quotehub::cache", key = %req.cache_key, event = "hit", "cache hit");
                let remaining = record.ttl_remaining(now);
                return Ok(self.outcome(
                    &req,
                    strategy,
                    record.value,
                    true,
                    Some(remaining),
                    None,
                    None,
                ));
            }
            if strategy == CacheStrategy::WeakTimeliness {
                // Stale-while-revalidate: serve the stale record now and
                // refresh out of band.
                self.spawn_background_refresh(req.clone(), strategy);
                debug!(
                    target = "quotehub::cache",
                    key = %req.cache_key,
                    event = "stale_serve",
                    "serving stale record; refresh scheduled"
                );
                return Ok(self.outcome(
                    &req,
                    strategy,
                    record.value,
                    false,
                    None,
                    Some(record.ttl_seconds),
                    None,
                ));
            }
        }

        self.fetch_coalesced(&req, strategy).await
    }

    /// Write a value under an adaptive TTL derived from market state and
    /// access frequency.
    pub async fn set_with_adaptive_ttl(
        &self,
        key: impl Into<String>,
        value: Value,
        opts: AdaptiveSetOptions,
    ) -> AdaptiveSetOutcome {
        let mode = match opts.classification {
            StorageClassification::StockQuote | StorageClassification::IndexQuote => {
                TtlMode::Realtime
            }
            _ => TtlMode::Analytical,
        };
        let base = self.market.recommended_ttl(opts.market, mode).await;
        let ttl = dynamic_ttl(&self.cfg, base, opts.access_frequency);
        let record = CachedRecord {
            key: key.into(),
            value,
            stored_at: self.clock.now_utc(),
            ttl_seconds: ttl,
            strategy: CacheStrategy::Adaptive,
        };
        let key = record.key.clone();
        match self.store.put(record, None).await {
            Ok(()) => AdaptiveSetOutcome {
                success: true,
                ttl,
                strategy: CacheStrategy::Adaptive,
            },
            Err(err) => {
                warn!(
                    target = "quotehub::cache",
                    key = %key,
                    symbol = opts.symbol.as_deref().unwrap_or(""),
                    %err,
                    "adaptive set rejected by store"
                );
                AdaptiveSetOutcome {
                    success: false,
                    ttl,
                    strategy: CacheStrategy::Adaptive,
                }
            }
        }
    }

    /// Resolve `MarketAware` against the current market state: strong while
    /// trading, weak otherwise.
    pub(crate) async fn resolve_strategy(
        &self,
        requested: CacheStrategy,
        market: Market,
    ) -> CacheStrategy {
        if requested != CacheStrategy::MarketAware {
            return requested;
        }
        match self.market.get(market).await {
            Ok(status) if status.state == MarketState::Trading => CacheStrategy::StrongTimeliness,
            Ok(_) => CacheStrategy::WeakTimeliness,
            Err(_) => CacheStrategy::StrongTimeliness,
        }
    }

    /// TTL to store under for an effective strategy.
    pub(crate) async fn ttl_for_strategy(
        &self,
        strategy: CacheStrategy,
        market: Market,
        key: &str,
    ) -> u64 {
        let base = match strategy {
            CacheStrategy::WeakTimeliness => {
                self.market.recommended_ttl(market, TtlMode::Analytical).await
            }
            _ => self.market.recommended_ttl(market, TtlMode::Realtime).await,
        };
        if strategy == CacheStrategy::Adaptive {
            let count = self
                .access
                .get(key)
                .map_or(0, |c| c.load(std::sync::atomic::Ordering::Relaxed));
            dynamic_ttl(&self.cfg, base, classify_frequency(count))
        } else {
            base.clamp(self.cfg.min_ttl_secs, self.cfg.max_ttl_secs)
        }
    }

    fn bump_access(&self, key: &str) {
        let counter = self
            .access
            .get_with(key.to_string(), || {
                Arc::new(std::sync::atomic::AtomicU32::new(0))
            });
        counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    pub(crate) async fn run_fetch(&self, req: &SmartCacheRequest) -> Result<Value, BrokerError> {
        let deadline = req.timeout.unwrap_or(self.cfg.fetch_timeout);
        let _load = self.governor.track();
        match tokio::time::timeout(deadline, (req.fetch)()).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::upstream_timeout(
                req.provider.clone(),
                req.cache_key.clone(),
            )),
        }
    }

    /// Store a freshly fetched value; faults are logged and reported back,
    /// never propagated.
    pub(crate) async fn store_fresh(
        &self,
        req: &SmartCacheRequest,
        strategy: CacheStrategy,
        value: &Value,
        ttl: u64,
    ) -> Option<String> {
        let record = CachedRecord {
            key: req.cache_key.clone(),
            value: value.clone(),
            stored_at: self.clock.now_utc(),
            ttl_seconds: ttl,
            strategy,
        };
        match self.store.put(record, req.meta.clone()).await {
            Ok(()) => None,
            Err(err) => {
                warn!(
                    target = "quotehub::cache",
                    key = %req.cache_key,
                    %err,
                    "store write failed; serving fresh data anyway"
                );
                Some(err.to_string())
            }
        }
    }

    /// Run the fetch under the per-key single-flight guard.
    ///
    /// The leader fetches and publishes as soon as upstream answers; the
    /// persist runs out of band, and the flight guard is released only once
    /// that write has landed so callers racing the write keep coalescing on
    /// the published result instead of refetching. Concurrent callers await
    /// the published result and report `hit = true`.
    async fn fetch_coalesced(
        &self,
        req: &SmartCacheRequest,
        strategy: CacheStrategy,
    ) -> Result<SmartCacheOutcome, BrokerError> {
        enum FlightRole {
            Leader(watch::Sender<Option<FlightResult>>),
            Follower(FlightReceiver),
        }

        let role = {
            let mut inflight = self.inflight.lock().await;
            if let Some(rx) = inflight.get(&req.cache_key) {
                FlightRole::Follower(rx.clone())
            } else {
                let (tx, rx) = watch::channel::<Option<FlightResult>>(None);
                inflight.insert(req.cache_key.clone(), rx);
                FlightRole::Leader(tx)
            }
        };

        match role {
            FlightRole::Leader(tx) => {
                let result = self.lead_flight(req, strategy).await;
                let _ = tx.send(Some(
                    result
                        .as_ref()
                        .map(|o| (o.data.clone(), o.dynamic_ttl.unwrap_or_default()))
                        .map_err(Clone::clone),
                ));
                match &result {
                    Ok(outcome) if !outcome.hit => {
                        // Fire-and-forget persist; write faults are logged
                        // inside store_fresh and never reach a caller.
                        let this = self.clone();
                        let req = req.clone();
                        let data = outcome.data.clone();
                        let ttl = outcome.dynamic_ttl.unwrap_or_default();
                        tokio::spawn(async move {
                            let _ = this.store_fresh(&req, strategy, &data, ttl).await;
                            this.inflight.lock().await.remove(&req.cache_key);
                        });
                    }
                    _ => {
                        self.inflight.lock().await.remove(&req.cache_key);
                    }
                }
                result
            }
            FlightRole::Follower(mut rx) => loop {
                let published = rx.borrow().clone();
                if let Some(result) = published {
                    return result.map(|(data, ttl)| {
                        self.outcome(req, strategy, data, true, None, Some(ttl), None)
                    });
                }
                if rx.changed().await.is_err() {
                    return Err(BrokerError::upstream(
                        req.provider.clone(),
                        "in-flight fetch abandoned",
                    ));
                }
            },
        }
    }

    async fn lead_flight(
        &self,
        req: &SmartCacheRequest,
        strategy: CacheStrategy,
    ) -> Result<SmartCacheOutcome, BrokerError> {
        // Double-check under leadership: a previous flight may have landed
        // between our store lookup and winning the guard.
        let now = self.clock.now_utc();
        if let Ok(Some(record)) = self.store.get(&req.cache_key).await
            && record.is_fresh(now)
        {
            let remaining = record.ttl_remaining(now);
            return Ok(self.outcome(
                req,
                strategy,
                record.value,
                true,
                Some(remaining),
                Some(record.ttl_seconds),
                None,
            ));
        }

        let data = self.run_fetch(req).await?;
        let ttl = match req.ttl_override {
            Some(ttl) => ttl.clamp(self.cfg.min_ttl_secs, self.cfg.max_ttl_secs),
            None => {
                self.ttl_for_strategy(strategy, req.market, &req.cache_key)
                    .await
            }
        };
        Ok(self.outcome(req, strategy, data, false, None, Some(ttl), None))
    }

    fn spawn_background_refresh(&self, req: SmartCacheRequest, strategy: CacheStrategy) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.fetch_coalesced(&req, strategy).await {
                warn!(
                    target = "quotehub::cache",
                    key = %req.cache_key,
                    %err,
                    "background refresh failed"
                );
            }
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn outcome(
        &self,
        req: &SmartCacheRequest,
        strategy: CacheStrategy,
        data: Value,
        hit: bool,
        ttl_remaining: Option<u64>,
        dynamic_ttl: Option<u64>,
        error: Option<String>,
    ) -> SmartCacheOutcome {
        SmartCacheOutcome {
            data,
            hit,
            ttl_remaining,
            dynamic_ttl,
            strategy,
            storage_key: req.cache_key.clone(),
            timestamp: self.clock.now_utc(),
            error,
        }
    }
}
