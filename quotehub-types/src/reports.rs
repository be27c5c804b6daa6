use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::Capability;

/// Direction of a symbol translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Provider form to standard form.
    ToStandard,
    /// Standard form to provider form.
    FromStandard,
}

impl Direction {
    /// Stable identifier for telemetry.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToStandard => "TO_STANDARD",
            Self::FromStandard => "FROM_STANDARD",
        }
    }
}

/// Accounting attached to every bulk symbol translation.
///
/// `total_symbols == success_count + failed_count` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformMetadata {
    /// Inputs received.
    pub total_symbols: usize,
    /// Inputs mapped successfully.
    pub success_count: usize,
    /// Inputs with no mapping.
    pub failed_count: usize,
    /// Wall time of the bulk call.
    pub elapsed_ms: u64,
}

/// Result envelope of a bulk symbol translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolTransformResult {
    /// Output symbols, input order preserved, failures omitted.
    pub mapped: Vec<String>,
    /// Input → output pairs for the successes.
    pub details: HashMap<String, String>,
    /// Inputs that could not be mapped.
    pub failed: Vec<String>,
    /// Totals and timing.
    pub metadata: TransformMetadata,
}

impl SymbolTransformResult {
    /// Envelope for a fatal bulk-mapping failure: nothing mapped,
    /// every input reported failed.
    #[must_use]
    pub fn all_failed(inputs: &[String], elapsed_ms: u64) -> Self {
        Self {
            mapped: Vec::new(),
            details: HashMap::new(),
            failed: inputs.to_vec(),
            metadata: TransformMetadata {
                total_symbols: inputs.len(),
                success_count: 0,
                failed_count: inputs.len(),
                elapsed_ms,
            },
        }
    }
}

/// Response metadata attached to every REST envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Provider that served the request.
    pub provider: String,
    /// Capability served.
    pub capability: Capability,
    /// Correlation id assigned at ingress.
    pub request_id: String,
    /// End-to-end handling time.
    pub processing_time_ms: u64,
    /// True when some symbols failed mapping or transformation.
    pub has_partial_failures: bool,
}

/// REST response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataResponse {
    /// Transformed records, one per resolved symbol.
    pub data: Vec<Value>,
    /// Request metadata.
    pub metadata: ResponseMeta,
}

/// Raw broadcast counters at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastStatsSnapshot {
    /// Pushes the gateway accepted.
    pub gateway_success: u64,
    /// Pushes the gateway rejected.
    pub gateway_failure: u64,
    /// All broadcast attempts.
    pub total_attempts: u64,
    /// Broadcast errors recorded (monotonic until reset).
    pub broadcast_errors: u64,
    /// Reason of the most recent failure.
    pub last_reason: Option<String>,
}

/// Qualitative health derived from broadcast error rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// No errors observed.
    Excellent,
    /// Error rate at or below 5%.
    Good,
    /// Error rate above 5%.
    Warning,
    /// Error rate above 10%.
    Critical,
}

/// Derived success metrics over the raw counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastAnalysis {
    /// All attempts since the last reset.
    pub total_broadcasts: u64,
    /// Accepted / attempted ratio.
    pub success_rate: f64,
}

/// Full broadcast statistics report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastStatsReport {
    /// Accepted / attempted ratio.
    pub gateway_usage_rate: f64,
    /// Errors / attempted ratio.
    pub error_rate: f64,
    /// Qualitative health band.
    pub health_status: HealthStatus,
    /// Derived success metrics.
    pub analysis: BroadcastAnalysis,
    /// Raw counters.
    pub raw: BroadcastStatsSnapshot,
}

/// Summary section of a cache performance analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheAnalysisSummary {
    /// Keys inspected.
    pub total_keys: usize,
    /// Keys with a fresh entry.
    pub cached: usize,
    /// Keys with an expired entry.
    pub expired: usize,
    /// cached / total ratio.
    pub hit_rate: f64,
}

/// A key close to expiry or already expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheHotspot {
    /// Storage key.
    pub key: String,
    /// Seconds of freshness remaining; zero when expired.
    pub ttl_remaining: u64,
    /// True when the entry has already expired.
    pub expired: bool,
}

/// Cache performance analysis over a set of keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheAnalysisReport {
    /// Aggregate counters.
    pub summary: CacheAnalysisSummary,
    /// Keys needing attention.
    pub hotspots: Vec<CacheHotspot>,
    /// Recommendations drawn from a closed catalogue.
    pub recommendations: Vec<String>,
}

/// Outcome of warming one hot query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupOutcome {
    /// Storage key.
    pub key: String,
    /// True when the key ended up warm (freshly fetched or already fresh).
    pub success: bool,
    /// TTL written when a fetch ran.
    pub ttl: Option<u64>,
    /// True when the existing entry was fresh enough to skip.
    pub skipped: bool,
    /// Failure detail when the fetch errored.
    pub error: Option<String>,
}
