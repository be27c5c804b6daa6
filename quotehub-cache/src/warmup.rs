use tracing::debug;

use quotehub_types::WarmupOutcome;

use crate::orchestrator::{CacheOrchestrator, SmartCacheRequest};

/// One warm-up candidate.
pub struct WarmupQuery {
    /// Storage key to warm.
    pub key: String,
    /// Request whose fetch closure produces the value.
    pub request: SmartCacheRequest,
    /// Higher priorities warm first.
    pub priority: i32,
}

impl CacheOrchestrator {
    /// Warm a set of hot queries in descending priority order.
    ///
    /// Keys whose stored entry still has at least the warm threshold of TTL
    /// remaining are skipped. Fetch errors are isolated per entry.
    pub async fn warmup_hot_queries(&self, mut queries: Vec<WarmupQuery>) -> Vec<WarmupOutcome> {
        queries.sort_by_key(|q| std::cmp::Reverse(q.priority));
        let threshold = self.config().warm_threshold_secs;

        let mut outcomes = Vec::with_capacity(queries.len());
        for query in queries {
            let now = self.clock().now_utc();
            let fresh_enough = match self.store().get(&query.key).await {
                Ok(Some(record)) => record.is_fresh(now) && record.ttl_remaining(now) >= threshold,
                Ok(None) => false,
                // A store fault never blocks warming: the fetch below will
                // try to repopulate it.
                Err(_) => false,
            };
            if fresh_enough {
                debug!(
                    target = "quotehub::cache",
                    key = %query.key,
                    "warm-up skipped; entry still fresh"
                );
                outcomes.push(WarmupOutcome {
                    key: query.key,
                    success: true,
                    ttl: None,
                    skipped: true,
                    error: None,
                });
                continue;
            }

            let req = query.request;
            match self.run_fetch(&req).await {
                Ok(value) => {
                    let strategy = self.resolve_strategy(req.strategy, req.market).await;
                    let ttl = self
                        .ttl_for_strategy(strategy, req.market, &req.cache_key)
                        .await;
                    let store_error = self.store_fresh(&req, strategy, &value, ttl).await;
                    outcomes.push(WarmupOutcome {
                        key: query.key,
                        success: store_error.is_none(),
                        ttl: Some(ttl),
                        skipped: false,
                        error: store_error,
                    });
                }
                Err(err) => outcomes.push(WarmupOutcome {
                    key: query.key,
                    success: false,
                    ttl: None,
                    skipped: false,
                    error: Some(err.to_string()),
                }),
            }
        }
        outcomes
    }
}
