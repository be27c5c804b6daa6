use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Cache behaviour selector dispatched by the smart cache orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum CacheStrategy {
    /// Read-through with single-flight per key; short market-driven TTL.
    StrongTimeliness,
    /// Serve stale immediately, refresh in the background; analytical TTL.
    WeakTimeliness,
    /// Strong during trading sessions, weak otherwise.
    MarketAware,
    /// Always fetch; nothing is stored.
    NoCache,
    /// TTL scaled by recent access frequency.
    Adaptive,
}

impl CacheStrategy {
    /// Stable identifier for telemetry and stored records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StrongTimeliness => "STRONG_TIMELINESS",
            Self::WeakTimeliness => "WEAK_TIMELINESS",
            Self::MarketAware => "MARKET_AWARE",
            Self::NoCache => "NO_CACHE",
            Self::Adaptive => "ADAPTIVE",
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recent access frequency band used by the adaptive strategy.
///
/// Rarely read data is cached longer (fewer refreshes); hot data gets a
/// short TTL to stay fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessFrequency {
    /// TTL scaled by 4.
    Low,
    /// TTL unchanged.
    Medium,
    /// TTL halved.
    High,
}

impl AccessFrequency {
    /// Scale a base TTL by this band's factor (before clamping).
    #[must_use]
    pub const fn scale(self, base_ttl_secs: u64) -> u64 {
        match self {
            Self::Low => base_ttl_secs.saturating_mul(4),
            Self::Medium => base_ttl_secs,
            Self::High => base_ttl_secs / 2,
        }
    }
}

/// A stored cache record with its freshness envelope.
///
/// A record is a hit iff `now - stored_at < ttl_seconds`. `NoCache` records
/// are never constructed: that strategy stores nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    /// Storage key.
    pub key: String,
    /// Transformed payload.
    pub value: Value,
    /// Write instant.
    pub stored_at: DateTime<Utc>,
    /// Freshness window in seconds.
    pub ttl_seconds: u64,
    /// Strategy that produced this record.
    pub strategy: CacheStrategy,
}

impl CachedRecord {
    /// Whether the record is still fresh at `now`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.stored_at).num_seconds();
        age >= 0 && (age as u64) < self.ttl_seconds
    }

    /// Seconds of freshness remaining at `now`; zero when expired.
    #[must_use]
    pub fn ttl_remaining(&self, now: DateTime<Utc>) -> u64 {
        let age = now.signed_duration_since(self.stored_at).num_seconds();
        if age < 0 {
            return self.ttl_seconds;
        }
        self.ttl_seconds.saturating_sub(age as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn record(ttl: u64, now: DateTime<Utc>) -> CachedRecord {
        CachedRecord {
            key: "k".into(),
            value: Value::Null,
            stored_at: now,
            ttl_seconds: ttl,
            strategy: CacheStrategy::StrongTimeliness,
        }
    }

    #[test]
    fn freshness_boundary_is_exclusive() {
        let now = Utc::now();
        let r = record(10, now);
        assert!(r.is_fresh(now));
        assert!(r.is_fresh(now + TimeDelta::seconds(9)));
        assert!(!r.is_fresh(now + TimeDelta::seconds(10)));
        assert_eq!(r.ttl_remaining(now + TimeDelta::seconds(4)), 6);
        assert_eq!(r.ttl_remaining(now + TimeDelta::seconds(40)), 0);
    }

    #[test]
    fn adaptive_scaling() {
        assert_eq!(AccessFrequency::Low.scale(60), 240);
        assert_eq!(AccessFrequency::Medium.scale(60), 60);
        assert_eq!(AccessFrequency::High.scale(60), 30);
    }
}
