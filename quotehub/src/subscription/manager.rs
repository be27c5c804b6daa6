use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::{Value, json};
use tracing::{debug, warn};

use quotehub_core::{Clock, Gateway, MetricsBus};
use quotehub_types::metrics::names;
use quotehub_types::{
    BroadcastAnalysis, BroadcastStatsReport, BroadcastStatsSnapshot, BrokerError, Capability,
    ChangeAction, ClientSubscription, HealthStatus, MetricEvent, MetricType, SubscriptionChange,
};

/// Subscription change listener.
pub type ChangeListener = Arc<dyn Fn(&SubscriptionChange) + Send + Sync>;

#[derive(Default)]
struct IndexState {
    clients: HashMap<String, ClientSubscription>,
    symbol_index: HashMap<String, HashSet<String>>,
}

#[derive(Default)]
struct BroadcastCounters {
    gateway_success: AtomicU64,
    gateway_failure: AtomicU64,
    total_attempts: AtomicU64,
    broadcast_errors: AtomicU64,
    last_reason: Mutex<Option<String>>,
}

/// Per-client subscription state with a symbol→clients inverse index and
/// gateway broadcast statistics.
///
/// Index mutations are serialized behind one lock; reads take snapshots.
/// The manager never retains a gateway: every broadcast receives one.
pub struct SubscriptionManager {
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsBus>,
    state: RwLock<IndexState>,
    listeners: RwLock<Vec<ChangeListener>>,
    counters: BroadcastCounters,
}

impl SubscriptionManager {
    /// Empty manager.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, metrics: Arc<dyn MetricsBus>) -> Self {
        Self {
            clock,
            metrics,
            state: RwLock::new(IndexState::default()),
            listeners: RwLock::new(Vec::new()),
            counters: BroadcastCounters::default(),
        }
    }

    /// Register a change listener. Listener panics are caught and logged;
    /// they never stop the other listeners.
    pub fn add_listener(&self, listener: ChangeListener) {
        self.listeners
            .write()
            .expect("listeners lock poisoned")
            .push(listener);
    }

    /// Union `symbols` into the client's subscription, creating it on first
    /// contact, and notify listeners.
    pub fn add(
        &self,
        client_id: &str,
        symbols: &[String],
        capability: Capability,
        provider: &str,
    ) {
        let now = self.clock.now_utc();
        {
            let mut guard = self.state.write().expect("state lock poisoned");
            let state = &mut *guard;
            let entry = state
                .clients
                .entry(client_id.to_string())
                .or_insert_with(|| ClientSubscription {
                    client_id: client_id.to_string(),
                    symbols: BTreeSet::new(),
                    capability,
                    provider: provider.to_string(),
                    subscribed_at: now,
                    last_active: now,
                });
            entry.last_active = now;
            entry.symbols.extend(symbols.iter().cloned());
            for symbol in symbols {
                state
                    .symbol_index
                    .entry(symbol.clone())
                    .or_default()
                    .insert(client_id.to_string());
            }
        }
        self.notify(&SubscriptionChange {
            action: ChangeAction::Subscribe,
            client_id: client_id.to_string(),
            symbols: symbols.to_vec(),
            provider: provider.to_string(),
            capability,
        });
    }

    /// Remove symbols from a client, or the whole client when `symbols` is
    /// `None`. A client whose symbol set empties is dropped entirely,
    /// keeping the inverse-index invariant.
    pub fn remove(&self, client_id: &str, symbols: Option<&[String]>) {
        let change = {
            let mut state = self.state.write().expect("state lock poisoned");
            let Some(existing) = state.clients.get_mut(client_id) else {
                return;
            };
            let provider = existing.provider.clone();
            let capability = existing.capability;
            let removed: Vec<String> = match symbols {
                Some(list) => list
                    .iter()
                    .filter(|s| existing.symbols.remove(*s))
                    .cloned()
                    .collect(),
                None => existing.symbols.iter().cloned().collect(),
            };
            let drop_client = symbols.is_none() || existing.symbols.is_empty();
            if drop_client {
                state.clients.remove(client_id);
            }
            for symbol in &removed {
                if let Some(subscribers) = state.symbol_index.get_mut(symbol) {
                    subscribers.remove(client_id);
                    if subscribers.is_empty() {
                        state.symbol_index.remove(symbol);
                    }
                }
            }
            if removed.is_empty() && !drop_client {
                return;
            }
            SubscriptionChange {
                action: ChangeAction::Unsubscribe,
                client_id: client_id.to_string(),
                symbols: removed,
                provider,
                capability,
            }
        };
        self.notify(&change);
    }

    /// Clients subscribed to a symbol.
    #[must_use]
    pub fn clients_for_symbol(&self, symbol: &str) -> Vec<String> {
        let state = self.state.read().expect("state lock poisoned");
        state
            .symbol_index
            .get(symbol)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Symbols a client is subscribed to.
    #[must_use]
    pub fn symbols_for_client(&self, client_id: &str) -> Vec<String> {
        let state = self.state.read().expect("state lock poisoned");
        state
            .clients
            .get(client_id)
            .map(|c| c.symbols.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Union of symbols required across clients, optionally filtered by
    /// provider and capability.
    #[must_use]
    pub fn all_required_symbols(
        &self,
        provider: Option<&str>,
        capability: Option<Capability>,
    ) -> BTreeSet<String> {
        let state = self.state.read().expect("state lock poisoned");
        state
            .clients
            .values()
            .filter(|c| provider.is_none_or(|p| c.provider == p))
            .filter(|c| capability.is_none_or(|cap| c.capability == cap))
            .flat_map(|c| c.symbols.iter().cloned())
            .collect()
    }

    /// Snapshot of one client's subscription.
    #[must_use]
    pub fn client(&self, client_id: &str) -> Option<ClientSubscription> {
        let state = self.state.read().expect("state lock poisoned");
        state.clients.get(client_id).cloned()
    }

    /// Bump a client's activity timestamp.
    pub fn update_activity(&self, client_id: &str) {
        let now = self.clock.now_utc();
        let mut state = self.state.write().expect("state lock poisoned");
        if let Some(client) = state.clients.get_mut(client_id) {
            client.last_active = now;
        }
    }

    /// Push `data` to every client subscribed to `symbol` through the given
    /// gateway.
    ///
    /// Success updates activity for the symbol's subscribers. Failure is
    /// counted and surfaced; it is never retried here, the upstream
    /// pipeline decides.
    ///
    /// # Errors
    /// `GatewayBroadcast` when the gateway is unavailable, declines the
    /// push, or throws.
    pub fn broadcast_to_symbol(
        &self,
        symbol: &str,
        data: &Value,
        gateway: &dyn Gateway,
    ) -> Result<(), BrokerError> {
        self.counters.total_attempts.fetch_add(1, Ordering::Relaxed);
        if !gateway.is_available() {
            return Err(self.record_broadcast_failure(symbol, "gateway unavailable"));
        }
        let room = format!("symbol:{symbol}");
        let payload = json!({"symbol": symbol, "data": data});
        match gateway.broadcast_to_room(&room, "data", &payload) {
            Ok(true) => {
                self.counters.gateway_success.fetch_add(1, Ordering::Relaxed);
                for client_id in self.clients_for_symbol(symbol) {
                    self.update_activity(&client_id);
                }
                Ok(())
            }
            Ok(false) => Err(self.record_broadcast_failure(symbol, "gateway declined broadcast")),
            Err(err) => Err(self.record_broadcast_failure(symbol, &err.to_string())),
        }
    }

    fn record_broadcast_failure(&self, symbol: &str, reason: &str) -> BrokerError {
        self.counters.gateway_failure.fetch_add(1, Ordering::Relaxed);
        self.counters
            .broadcast_errors
            .fetch_add(1, Ordering::Relaxed);
        *self
            .counters
            .last_reason
            .lock()
            .expect("reason lock poisoned") = Some(reason.to_string());
        warn!(
            target = "quotehub::subscription",
            symbol,
            reason,
            "gateway broadcast failed"
        );
        BrokerError::gateway(reason)
    }

    /// Broadcast statistics with derived health.
    #[must_use]
    pub fn stats(&self) -> BroadcastStatsReport {
        let raw = BroadcastStatsSnapshot {
            gateway_success: self.counters.gateway_success.load(Ordering::Relaxed),
            gateway_failure: self.counters.gateway_failure.load(Ordering::Relaxed),
            total_attempts: self.counters.total_attempts.load(Ordering::Relaxed),
            broadcast_errors: self.counters.broadcast_errors.load(Ordering::Relaxed),
            last_reason: self
                .counters
                .last_reason
                .lock()
                .expect("reason lock poisoned")
                .clone(),
        };
        let attempts = raw.total_attempts.max(1) as f64;
        let error_rate = raw.broadcast_errors as f64 / attempts;
        let success_rate = raw.gateway_success as f64 / attempts;
        let health_status = if raw.broadcast_errors == 0 {
            HealthStatus::Excellent
        } else if error_rate > 0.10 {
            HealthStatus::Critical
        } else if error_rate > 0.05 {
            HealthStatus::Warning
        } else {
            HealthStatus::Good
        };
        BroadcastStatsReport {
            gateway_usage_rate: success_rate,
            error_rate,
            health_status,
            analysis: BroadcastAnalysis {
                total_broadcasts: raw.total_attempts,
                success_rate,
            },
            raw,
        }
    }

    /// Zero all broadcast counters.
    pub fn reset_stats(&self) {
        self.counters.gateway_success.store(0, Ordering::Relaxed);
        self.counters.gateway_failure.store(0, Ordering::Relaxed);
        self.counters.total_attempts.store(0, Ordering::Relaxed);
        self.counters.broadcast_errors.store(0, Ordering::Relaxed);
        *self
            .counters
            .last_reason
            .lock()
            .expect("reason lock poisoned") = None;
        self.metrics.emit(MetricEvent::new(
            "subscription_manager",
            MetricType::Stream,
            names::STATS_RESET,
            1.0,
        ));
    }

    /// Evict every client idle longer than `idle_timeout`, emitting an
    /// unsubscribe change per eviction. Returns the evicted client ids.
    pub fn reap_idle(&self, idle_timeout: std::time::Duration) -> Vec<String> {
        let now = self.clock.now_utc();
        let cutoff = chrono::TimeDelta::from_std(idle_timeout)
            .unwrap_or_else(|_| chrono::TimeDelta::seconds(300));
        let idle: Vec<String> = {
            let state = self.state.read().expect("state lock poisoned");
            state
                .clients
                .values()
                .filter(|c| now.signed_duration_since(c.last_active) > cutoff)
                .map(|c| c.client_id.clone())
                .collect()
        };
        for client_id in &idle {
            debug!(
                target = "quotehub::subscription",
                client_id, "idle client reaped"
            );
            self.remove(client_id, None);
        }
        idle
    }

    /// Total registered clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.state.read().expect("state lock poisoned").clients.len()
    }

    fn notify(&self, change: &SubscriptionChange) {
        let listeners = self.listeners.read().expect("listeners lock poisoned");
        for listener in listeners.iter() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(change))) {
                warn!(
                    target = "quotehub::subscription",
                    client_id = %change.client_id,
                    "change listener panicked: {panic:?}"
                );
            }
        }
    }
}
