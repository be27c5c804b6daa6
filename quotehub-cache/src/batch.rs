use futures::StreamExt;
use futures::stream;
use tracing::warn;

use quotehub_types::{BrokerError, CacheStrategy};

use crate::orchestrator::{CacheOrchestrator, SmartCacheOutcome, SmartCacheRequest};

/// Options for a batch lookup.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Worker bound for the miss fan-out; the governor's current
    /// concurrency applies when absent.
    pub concurrency: Option<usize>,
    /// When false every request bypasses the store (`NoCache` semantics).
    pub enable_cache: bool,
}

impl BatchOptions {
    /// Cache-enabled options with the governor deciding concurrency.
    #[must_use]
    pub const fn cached() -> Self {
        Self {
            concurrency: None,
            enable_cache: true,
        }
    }
}

impl CacheOrchestrator {
    /// Batch lookup: one `mget` round trip for the hits, then a bounded
    /// worker pool over the misses. Results preserve input order.
    pub async fn batch_get(
        &self,
        reqs: Vec<SmartCacheRequest>,
        opts: BatchOptions,
    ) -> Vec<Result<SmartCacheOutcome, BrokerError>> {
        let concurrency = opts
            .concurrency
            .unwrap_or_else(|| self.governor.current_concurrency())
            .max(1);

        let mut slots: Vec<Option<Result<SmartCacheOutcome, BrokerError>>> =
            (0..reqs.len()).map(|_| None).collect();
        let mut pending: Vec<(usize, SmartCacheRequest)> = Vec::new();

        if opts.enable_cache {
            let keys: Vec<String> = reqs.iter().map(|r| r.cache_key.clone()).collect();
            let now = self.clock().now_utc();
            match self.store().mget(&keys).await {
                Ok(records) => {
                    for ((idx, req), record) in reqs.into_iter().enumerate().zip(records) {
                        match record {
                            Some(rec) if rec.is_fresh(now) => {
                                let remaining = rec.ttl_remaining(now);
                                let strategy =
                                    self.resolve_strategy(req.strategy, req.market).await;
                                slots[idx] = Some(Ok(SmartCacheOutcome {
                                    data: rec.value,
                                    hit: true,
                                    ttl_remaining: Some(remaining),
                                    dynamic_ttl: None,
                                    strategy,
                                    storage_key: req.cache_key,
                                    timestamp: now,
                                    error: None,
                                }));
                            }
                            _ => pending.push((idx, req)),
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        target = "quotehub::cache",
                        %err,
                        "batch mget failed; fanning out individually"
                    );
                    pending = reqs.into_iter().enumerate().collect();
                }
            }
        } else {
            pending = reqs
                .into_iter()
                .map(|mut req| {
                    req.strategy = CacheStrategy::NoCache;
                    req
                })
                .enumerate()
                .collect();
        }

        let fetched: Vec<(usize, Result<SmartCacheOutcome, BrokerError>)> =
            stream::iter(pending)
                .map(|(idx, req)| async move { (idx, self.get_with_smart_cache(req).await) })
                .buffer_unordered(concurrency)
                .collect()
                .await;
        for (idx, result) in fetched {
            slots[idx] = Some(result);
        }

        slots
            .into_iter()
            .map(|slot| slot.expect("every slot is filled by hit or fan-out"))
            .collect()
    }
}
