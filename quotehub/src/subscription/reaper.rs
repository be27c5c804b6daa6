use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use quotehub_types::SubscriptionConfig;

use super::manager::SubscriptionManager;

/// Spawn the idle reaper: a timer that evicts clients whose `last_active`
/// is older than the idle timeout. Runs until aborted; a tick that reaps
/// nothing is free.
pub fn spawn_reaper(
    manager: Arc<SubscriptionManager>,
    cfg: SubscriptionConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cfg.reaper_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = manager.reap_idle(cfg.idle_timeout);
            if !evicted.is_empty() {
                info!(
                    target = "quotehub::subscription",
                    count = evicted.len(),
                    "idle clients reaped"
                );
            }
        }
    })
}
