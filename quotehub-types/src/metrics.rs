use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Broad category a metric event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum MetricType {
    /// Latency and throughput observations.
    Performance,
    /// Cache hit/miss/TTL observations.
    Cache,
    /// Threshold breaches and degradations.
    Alert,
    /// Streaming pipeline observations.
    Stream,
    /// Host resource observations.
    System,
}

impl MetricType {
    /// Stable identifier for the event envelope.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::Cache => "cache",
            Self::Alert => "alert",
            Self::Stream => "stream",
            Self::System => "system",
        }
    }
}

/// One structured observation pushed onto the metrics bus.
///
/// The core aggregates nothing; an external collector owns storage. Names
/// are stable strings from [`names`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    /// Emission instant.
    pub timestamp: DateTime<Utc>,
    /// Emitting subsystem, e.g. `"query_statistics"`.
    pub source: String,
    /// Broad category.
    pub metric_type: MetricType,
    /// Stable metric name.
    pub metric_name: String,
    /// Observed value.
    pub metric_value: f64,
    /// Free-form dimension tags.
    pub tags: BTreeMap<String, String>,
}

impl MetricEvent {
    /// Build an event stamped `now`.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        metric_type: MetricType,
        metric_name: impl Into<String>,
        metric_value: f64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.into(),
            metric_type,
            metric_name: metric_name.into(),
            metric_value,
            tags: BTreeMap::new(),
        }
    }

    /// Attach a tag, builder style.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Stable metric names emitted by the broker.
pub mod names {
    /// Governor changed the dynamic concurrency.
    pub const CONCURRENCY_ADJUSTED: &str = "concurrency_adjusted";
    /// Batching pipeline changed its flush interval.
    pub const BATCH_INTERVAL_ADJUSTED: &str = "batch_interval_adjusted";
    /// Governor declared memory pressure.
    pub const MEMORY_PRESSURE: &str = "memory_pressure";
    /// Running count of memory-pressure events.
    pub const MEMORY_PRESSURE_EVENTS: &str = "memory_pressure_events";
    /// Broadcast statistics were reset on demand.
    pub const STATS_RESET: &str = "stats_reset";
    /// Bulk symbol mapping failed upstream.
    pub const SYMBOL_TRANSFORMATION_FAILED: &str = "symbol_transformation_failed";
    /// A query exceeded the slow-query threshold.
    pub const SLOW_QUERY_DETECTED: &str = "slow_query_detected";
    /// Service shutdown marker.
    pub const SERVICE_SHUTDOWN: &str = "service_shutdown";
    /// A stream record fell back to the degraded path.
    pub const STREAM_PIPELINE_FALLBACK: &str = "stream_pipeline_fallback";
    /// One stream batch fully processed.
    pub const STREAM_BATCH_PROCESSED: &str = "stream_batch_processed";
}
