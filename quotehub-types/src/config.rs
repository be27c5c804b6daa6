//! Configuration types shared across the broker, pipelines, and cache.
//!
//! Every struct carries its documented defaults in `Default` and an
//! environment-driven constructor that falls back to those defaults on
//! missing or unparsable values. The environment names are stable and part
//! of the deployment contract.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheStrategy;

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Dynamic batching pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Whether the adaptive interval loop is active; when false the pipeline
    /// flushes at `base_interval_ms` forever.
    pub enabled: bool,
    /// Flush interval the adjuster nudges back towards.
    pub base_interval_ms: u64,
    /// Lower clamp for the dynamic interval.
    pub min_interval_ms: u64,
    /// Upper clamp for the dynamic interval.
    pub max_interval_ms: u64,
    /// Interval applied when mean batch size crosses the high-load threshold.
    pub high_load_interval_ms: u64,
    /// Interval applied when mean batch size falls under the low-load threshold.
    pub low_load_interval_ms: u64,
    /// Mean batch size at or above which the pipeline is considered loaded.
    pub high_load_threshold: usize,
    /// Mean batch size at or below which the pipeline is considered idle.
    pub low_load_threshold: usize,
    /// Number of recent batch sizes sampled for the mean.
    pub sample_window: usize,
    /// Step applied when nudging the interval back to base.
    pub adjustment_step_ms: u64,
    /// How often the adjuster runs.
    pub adjustment_frequency_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_interval_ms: 50,
            min_interval_ms: 10,
            max_interval_ms: 200,
            high_load_interval_ms: 25,
            low_load_interval_ms: 100,
            high_load_threshold: 15,
            low_load_threshold: 5,
            sample_window: 20,
            adjustment_step_ms: 5,
            adjustment_frequency_ms: 5_000,
        }
    }
}

impl BatchingConfig {
    /// Load from the environment, falling back to defaults per field.
    #[must_use]
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            enabled: env_parse("STREAM_RECEIVER_DYNAMIC_BATCHING_ENABLED", d.enabled),
            base_interval_ms: env_parse("STREAM_RECEIVER_BATCH_INTERVAL", d.base_interval_ms),
            min_interval_ms: env_parse("DYNAMIC_BATCHING_MIN_INTERVAL", d.min_interval_ms),
            max_interval_ms: env_parse("DYNAMIC_BATCHING_MAX_INTERVAL", d.max_interval_ms),
            high_load_interval_ms: env_parse(
                "DYNAMIC_BATCHING_HIGH_LOAD_INTERVAL",
                d.high_load_interval_ms,
            ),
            low_load_interval_ms: env_parse(
                "DYNAMIC_BATCHING_LOW_LOAD_INTERVAL",
                d.low_load_interval_ms,
            ),
            high_load_threshold: env_parse(
                "DYNAMIC_BATCHING_HIGH_LOAD_THRESHOLD",
                d.high_load_threshold,
            ),
            low_load_threshold: env_parse(
                "DYNAMIC_BATCHING_LOW_LOAD_THRESHOLD",
                d.low_load_threshold,
            ),
            sample_window: env_parse("DYNAMIC_BATCHING_SAMPLE_WINDOW", d.sample_window),
            adjustment_step_ms: env_parse("DYNAMIC_BATCHING_ADJUSTMENT_STEP", d.adjustment_step_ms),
            adjustment_frequency_ms: env_parse(
                "DYNAMIC_BATCHING_ADJUSTMENT_FREQUENCY",
                d.adjustment_frequency_ms,
            ),
        }
    }

    /// Clamp an interval into the configured `[min, max]` band.
    #[must_use]
    pub const fn clamp_interval(&self, ms: u64) -> u64 {
        if ms < self.min_interval_ms {
            self.min_interval_ms
        } else if ms > self.max_interval_ms {
            self.max_interval_ms
        } else {
            ms
        }
    }
}

/// Memory/concurrency governor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// How often the governor samples the system.
    pub sample_interval_ms: u64,
    /// Concurrency delta applied per adjustment.
    pub step: usize,
    /// Lower clamp for dynamic concurrency.
    pub min_concurrency: usize,
    /// Upper clamp for dynamic concurrency.
    pub max_concurrency: usize,
    /// Concurrency used before the first sample lands.
    pub initial_concurrency: usize,
    /// Base batch size scaled by dynamic concurrency.
    pub base_batch_size: usize,
    /// CPU load (1-min avg / cores) under which concurrency may rise.
    pub cpu_raise_below: f64,
    /// CPU load above which concurrency is lowered.
    pub cpu_lower_above: f64,
    /// Heap usage ratio under which concurrency may rise.
    pub memory_raise_below: f64,
    /// Heap usage ratio above which concurrency is lowered.
    pub memory_warning_threshold: f64,
    /// Heap usage ratio at which memory pressure is declared.
    pub memory_critical_threshold: f64,
    /// Free-memory floor below which memory pressure is declared.
    pub min_free_bytes: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 30_000,
            step: 5,
            min_concurrency: 2,
            max_concurrency: 32,
            initial_concurrency: 8,
            base_batch_size: 10,
            cpu_raise_below: 0.4,
            cpu_lower_above: 0.7,
            memory_raise_below: 0.7,
            memory_warning_threshold: 0.85,
            memory_critical_threshold: 0.9,
            min_free_bytes: 512 * 1024 * 1024,
        }
    }
}

impl GovernorConfig {
    /// Load from the environment, falling back to defaults per field.
    #[must_use]
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            memory_warning_threshold: env_parse(
                "MEMORY_WARNING_THRESHOLD",
                d.memory_warning_threshold,
            ),
            memory_critical_threshold: env_parse(
                "MEMORY_CRITICAL_THRESHOLD",
                d.memory_critical_threshold,
            ),
            ..d
        }
    }
}

/// Sliding-window connection budget applied before a request slot is taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Connections allowed per window.
    pub max_connections: u64,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    /// Load from the environment; `RATE_LIMIT_WINDOW_SIZE` is in seconds.
    #[must_use]
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_connections: env_parse("RATE_LIMIT_MAX_CONNECTIONS", d.max_connections),
            window: Duration::from_secs(env_parse("RATE_LIMIT_WINDOW_SIZE", d.window.as_secs())),
        }
    }
}

/// Smart-cache clamps and fetch deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Lower clamp for any computed TTL, seconds.
    pub min_ttl_secs: u64,
    /// Upper clamp for any computed TTL, seconds.
    pub max_ttl_secs: u64,
    /// Entries with at least this much TTL remaining are skipped by warm-up.
    pub warm_threshold_secs: u64,
    /// Deadline applied to fetch closures when the request carries none.
    pub fetch_timeout: Duration,
    /// Strategy applied when the request does not select one.
    pub default_strategy: CacheStrategy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_ttl_secs: 5,
            max_ttl_secs: 3_600,
            warm_threshold_secs: 60,
            fetch_timeout: Duration::from_secs(5),
            default_strategy: CacheStrategy::StrongTimeliness,
        }
    }
}

/// Stream subscription lifecycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Clients idle longer than this are reaped.
    pub idle_timeout: Duration,
    /// How often the reaper runs.
    pub reaper_interval: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            reaper_interval: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker tuning for the stream transform stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Sliding window of recent call outcomes.
    pub window: usize,
    /// Failure ratio over the window that opens the breaker.
    pub failure_rate: f64,
    /// Consecutive failures that open the breaker regardless of the window.
    pub consecutive_failures: usize,
    /// Time in OPEN before a half-open probe is allowed.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window: 20,
            failure_rate: 0.5,
            consecutive_failures: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Query statistics emission tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Queries slower than this emit an additional slow-query event.
    pub slow_query_threshold_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 500,
        }
    }
}

/// Aggregate configuration for a broker instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Dynamic batching pipeline tuning.
    pub batching: BatchingConfig,
    /// Memory/concurrency governor tuning.
    pub governor: GovernorConfig,
    /// REST connection budget.
    pub rate_limit: RateLimitConfig,
    /// Smart-cache clamps.
    pub cache: CacheConfig,
    /// Subscription lifecycle tuning.
    pub subscription: SubscriptionConfig,
    /// Stream transform circuit breaker.
    pub breaker: BreakerConfig,
    /// Query statistics thresholds.
    pub stats: StatsConfig,
}

impl BrokerConfig {
    /// Load every section from the environment in one call.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            batching: BatchingConfig::from_env(),
            governor: GovernorConfig::from_env(),
            rate_limit: RateLimitConfig::from_env(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let b = BatchingConfig::default();
        assert_eq!(b.base_interval_ms, 50);
        assert_eq!(b.min_interval_ms, 10);
        assert_eq!(b.max_interval_ms, 200);
        assert_eq!(b.high_load_threshold, 15);
        assert_eq!(b.sample_window, 20);

        let g = GovernorConfig::default();
        assert_eq!(g.max_concurrency, 32);
        assert_eq!(g.min_concurrency, 2);
        assert!((g.memory_critical_threshold - 0.9).abs() < f64::EPSILON);

        let s = SubscriptionConfig::default();
        assert_eq!(s.idle_timeout, Duration::from_secs(300));
    }

    #[test]
    fn interval_clamp() {
        let b = BatchingConfig::default();
        assert_eq!(b.clamp_interval(3), 10);
        assert_eq!(b.clamp_interval(500), 200);
        assert_eq!(b.clamp_interval(50), 50);
    }

    #[test]
    fn env_overrides_apply() {
        // Single test mutating the environment to avoid races between
        // parallel tests reading the same variables.
        unsafe {
            env::set_var("RATE_LIMIT_MAX_CONNECTIONS", "7");
            env::set_var("RATE_LIMIT_WINDOW_SIZE", "5");
        }
        let r = RateLimitConfig::from_env();
        assert_eq!(r.max_connections, 7);
        assert_eq!(r.window, Duration::from_secs(5));
        unsafe {
            env::remove_var("RATE_LIMIT_MAX_CONNECTIONS");
            env::remove_var("RATE_LIMIT_WINDOW_SIZE");
        }
    }
}
