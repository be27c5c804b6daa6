use std::collections::BTreeMap;
use std::sync::Arc;

use quotehub_core::MetricsBus;
use quotehub_types::metrics::names;
use quotehub_types::{MetricEvent, MetricType, StatsConfig};

/// Query statistics emitter.
///
/// No local aggregation: every hot-path call pushes one structured event
/// onto the bus; an external collector owns storage. Emission is already
/// non-blocking and infallible at the bus boundary, so nothing here can
/// break a hot path.
pub struct QueryStatistics {
    metrics: Arc<dyn MetricsBus>,
    cfg: StatsConfig,
}

impl QueryStatistics {
    /// Emitter with the given slow-query threshold.
    #[must_use]
    pub fn new(metrics: Arc<dyn MetricsBus>, cfg: StatsConfig) -> Self {
        Self { metrics, cfg }
    }

    /// Record one query observation; queries over the threshold emit an
    /// additional `slow_query_detected` event tagged `warning`.
    pub fn record_query(
        &self,
        metric_name: &str,
        duration_ms: u64,
        tags: BTreeMap<String, String>,
    ) {
        let mut event = MetricEvent::new(
            "query_statistics",
            MetricType::Performance,
            metric_name,
            duration_ms as f64,
        );
        event.tags = tags.clone();
        self.metrics.emit(event);

        if duration_ms > self.cfg.slow_query_threshold_ms {
            let mut slow = MetricEvent::new(
                "query_statistics",
                MetricType::Alert,
                names::SLOW_QUERY_DETECTED,
                duration_ms as f64,
            );
            slow.tags = tags;
            slow.tags
                .insert("severity".to_string(), "warning".to_string());
            slow.tags
                .insert("threshold_ms".to_string(), self.cfg.slow_query_threshold_ms.to_string());
            self.metrics.emit(slow);
        }
    }

    /// Record a cache observation (hit ratio, ttl decisions).
    pub fn record_cache(&self, metric_name: &str, value: f64, tags: BTreeMap<String, String>) {
        let mut event =
            MetricEvent::new("query_statistics", MetricType::Cache, metric_name, value);
        event.tags = tags;
        self.metrics.emit(event);
    }

    /// Emit the shutdown marker.
    pub fn shutdown(&self) {
        self.metrics.emit(MetricEvent::new(
            "query_statistics",
            MetricType::Performance,
            names::SERVICE_SHUTDOWN,
            1.0,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotehub_core::ChannelMetricsBus;

    #[tokio::test]
    async fn slow_queries_emit_a_second_event() {
        let (bus, mut rx) = ChannelMetricsBus::new(8);
        let stats = QueryStatistics::new(Arc::new(bus), StatsConfig::default());

        stats.record_query("handle", 100, BTreeMap::new());
        stats.record_query("handle", 900, BTreeMap::new());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.metric_name, "handle");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.metric_name, "handle");
        let slow = rx.recv().await.unwrap();
        assert_eq!(slow.metric_name, names::SLOW_QUERY_DETECTED);
        assert_eq!(slow.tags.get("severity").map(String::as_str), Some("warning"));
    }
}
