use tokio::sync::mpsc;
use tracing::warn;

use quotehub_types::MetricEvent;

/// Sink for metric events emitted on hot paths.
///
/// Emission must never block or fail the caller: implementations drop and
/// log on backpressure.
pub trait MetricsBus: Send + Sync {
    /// Emit one event; best effort.
    fn emit(&self, event: MetricEvent);
}

/// Bounded, non-blocking channel into an external metrics collector.
///
/// `try_send` keeps the hot path wait-free; a full or closed channel drops
/// the event with a warning.
pub struct ChannelMetricsBus {
    tx: mpsc::Sender<MetricEvent>,
}

impl ChannelMetricsBus {
    /// Create a bus with the given buffer; the receiver goes to the
    /// collector task.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<MetricEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl MetricsBus for ChannelMetricsBus {
    fn emit(&self, event: MetricEvent) {
        if let Err(err) = self.tx.try_send(event) {
            warn!(
                target = "quotehub::metrics",
                %err,
                "metric event dropped"
            );
        }
    }
}

/// Bus that discards everything. For wiring where no collector exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetricsBus;

impl MetricsBus for NullMetricsBus {
    fn emit(&self, _event: MetricEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotehub_types::MetricType;

    #[tokio::test]
    async fn events_flow_through_the_channel() {
        let (bus, mut rx) = ChannelMetricsBus::new(4);
        bus.emit(MetricEvent::new("t", MetricType::Cache, "hits", 1.0));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.metric_name, "hits");
    }

    #[test]
    fn full_channel_drops_without_blocking() {
        let (bus, rx) = ChannelMetricsBus::new(1);
        bus.emit(MetricEvent::new("t", MetricType::Cache, "a", 1.0));
        // Second emit hits a full buffer; must return immediately.
        bus.emit(MetricEvent::new("t", MetricType::Cache, "b", 1.0));
        drop(rx);
        // Closed channel must also be a no-op.
        bus.emit(MetricEvent::new("t", MetricType::Cache, "c", 1.0));
    }
}
