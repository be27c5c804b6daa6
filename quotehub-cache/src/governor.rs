use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use sysinfo::System;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use quotehub_core::MetricsBus;
use quotehub_types::metrics::names;
use quotehub_types::{GovernorConfig, MetricEvent, MetricType};

/// One sample of host load.
#[derive(Debug, Clone, Copy)]
pub struct SystemSample {
    /// 1-minute load average divided by core count.
    pub cpu_load: f64,
    /// Used / total memory.
    pub memory_used_ratio: f64,
    /// Memory still available to the process, bytes.
    pub free_bytes: u64,
}

/// Source of host load samples.
pub trait SystemProbe: Send + Sync {
    /// Take one sample.
    fn sample(&self) -> SystemSample;
}

/// Probe backed by `sysinfo`.
pub struct SysinfoProbe {
    sys: Mutex<System>,
}

impl SysinfoProbe {
    /// Probe over a fresh `sysinfo` handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for SysinfoProbe {
    fn sample(&self) -> SystemSample {
        let mut sys = self.sys.lock().expect("probe mutex poisoned");
        sys.refresh_memory();
        let cores = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        let total = sys.total_memory().max(1);
        SystemSample {
            cpu_load: System::load_average().one / cores as f64,
            memory_used_ratio: sys.used_memory() as f64 / total as f64,
            free_bytes: sys.available_memory(),
        }
    }
}

/// Adapts fan-out concurrency and batch sizing to host load.
///
/// A timer task samples the host every `sample_interval_ms` and applies the
/// adjustment rules; consumers read [`current_concurrency`] and
/// [`batch_size`] at dispatch time and track in-flight work through
/// [`track`].
///
/// [`current_concurrency`]: Self::current_concurrency
/// [`batch_size`]: Self::batch_size
/// [`track`]: Self::track
pub struct ConcurrencyGovernor {
    cfg: GovernorConfig,
    concurrency: AtomicUsize,
    in_flight: AtomicUsize,
    pressure_events: AtomicU64,
    under_pressure: AtomicBool,
    metrics: Arc<dyn MetricsBus>,
}

impl ConcurrencyGovernor {
    /// Governor starting at the configured initial concurrency.
    #[must_use]
    pub fn new(cfg: GovernorConfig, metrics: Arc<dyn MetricsBus>) -> Self {
        let initial = cfg
            .initial_concurrency
            .clamp(cfg.min_concurrency, cfg.max_concurrency);
        Self {
            cfg,
            concurrency: AtomicUsize::new(initial),
            in_flight: AtomicUsize::new(0),
            pressure_events: AtomicU64::new(0),
            under_pressure: AtomicBool::new(false),
            metrics,
        }
    }

    /// Current dynamic concurrency bound.
    #[must_use]
    pub fn current_concurrency(&self) -> usize {
        self.concurrency.load(Ordering::Relaxed)
    }

    /// Memory-pressure events observed since construction.
    #[must_use]
    pub fn pressure_events(&self) -> u64 {
        self.pressure_events.load(Ordering::Relaxed)
    }

    /// Batch size scaled by dynamic concurrency, reduced under pressure and
    /// when in-flight work already exceeds the concurrency bound.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        let concurrency = self.current_concurrency();
        let mut size = self.cfg.base_batch_size * (concurrency / 8).max(1);
        if self.under_pressure.load(Ordering::Relaxed)
            || self.in_flight.load(Ordering::Relaxed) > concurrency
        {
            size /= 2;
        }
        size.clamp(5, 50)
    }

    /// RAII guard counting one in-flight operation.
    #[must_use]
    pub fn track(&self) -> LoadGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        LoadGuard { governor: self }
    }

    /// Apply the adjustment rules to one sample.
    pub fn tick(&self, sample: SystemSample) {
        let old = self.current_concurrency();
        let mut next = old;

        if sample.cpu_load < self.cfg.cpu_raise_below
            && sample.memory_used_ratio < self.cfg.memory_raise_below
        {
            next = (old + self.cfg.step).min(self.cfg.max_concurrency);
        } else if sample.cpu_load > self.cfg.cpu_lower_above
            || sample.memory_used_ratio > self.cfg.memory_warning_threshold
        {
            next = old.saturating_sub(self.cfg.step).max(self.cfg.min_concurrency);
        }

        let pressure = sample.memory_used_ratio > self.cfg.memory_critical_threshold
            || sample.free_bytes < self.cfg.min_free_bytes;
        if pressure {
            next = (next / 2).max(self.cfg.min_concurrency);
            let events = self.pressure_events.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                target = "quotehub::governor",
                memory_used = sample.memory_used_ratio,
                free_bytes = sample.free_bytes,
                "memory pressure; halving concurrency"
            );
            self.metrics.emit(MetricEvent::new(
                "governor",
                MetricType::System,
                names::MEMORY_PRESSURE,
                1.0,
            ));
            self.metrics.emit(MetricEvent::new(
                "governor",
                MetricType::System,
                names::MEMORY_PRESSURE_EVENTS,
                events as f64,
            ));
        }
        self.under_pressure.store(pressure, Ordering::Relaxed);

        if next != old {
            self.concurrency.store(next, Ordering::Relaxed);
            info!(
                target = "quotehub::governor",
                old,
                new = next,
                cpu_load = sample.cpu_load,
                memory_used = sample.memory_used_ratio,
                "concurrency adjusted"
            );
            self.metrics.emit(
                MetricEvent::new(
                    "governor",
                    MetricType::System,
                    names::CONCURRENCY_ADJUSTED,
                    next as f64,
                )
                .with_tag("old", old.to_string())
                .with_tag("new", next.to_string()),
            );
        }
    }

    /// Spawn the sampling loop; the task runs until aborted.
    pub fn spawn(self: Arc<Self>, probe: Arc<dyn SystemProbe>) -> JoinHandle<()> {
        let governor = self;
        let interval = Duration::from_millis(governor.cfg.sample_interval_ms.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so the loop samples
            // on the configured cadence.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                governor.tick(probe.sample());
            }
        })
    }
}

/// Guard returned by [`ConcurrencyGovernor::track`]; releases its in-flight
/// slot on drop.
pub struct LoadGuard<'a> {
    governor: &'a ConcurrencyGovernor,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.governor.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotehub_core::NullMetricsBus;

    fn governor() -> Arc<ConcurrencyGovernor> {
        Arc::new(ConcurrencyGovernor::new(
            GovernorConfig::default(),
            Arc::new(NullMetricsBus),
        ))
    }

    const fn sample(cpu: f64, mem: f64, free_gb: u64) -> SystemSample {
        SystemSample {
            cpu_load: cpu,
            memory_used_ratio: mem,
            free_bytes: free_gb * 1024 * 1024 * 1024,
        }
    }

    #[test]
    fn idle_host_raises_concurrency_up_to_the_cap() {
        let g = governor();
        for _ in 0..10 {
            g.tick(sample(0.1, 0.3, 8));
        }
        assert_eq!(g.current_concurrency(), 32);
    }

    #[test]
    fn loaded_host_lowers_concurrency_to_the_floor() {
        let g = governor();
        for _ in 0..10 {
            g.tick(sample(0.9, 0.5, 8));
        }
        assert_eq!(g.current_concurrency(), 2);
    }

    #[test]
    fn memory_pressure_halves_and_counts() {
        let g = governor();
        g.tick(sample(0.1, 0.95, 8));
        // Raise step applies first only when thresholds allow; here the
        // critical memory ratio forces the halving path.
        assert!(g.current_concurrency() <= GovernorConfig::default().initial_concurrency);
        assert_eq!(g.pressure_events(), 1);
        assert!(g.batch_size() >= 5);
    }

    #[test]
    fn low_free_memory_alone_triggers_pressure() {
        let g = governor();
        g.tick(sample(0.1, 0.3, 0));
        assert_eq!(g.pressure_events(), 1);
    }

    #[test]
    fn batch_size_scales_with_concurrency() {
        let g = governor();
        for _ in 0..10 {
            g.tick(sample(0.1, 0.3, 8));
        }
        // concurrency 32 -> base 10 * 4 = 40.
        assert_eq!(g.batch_size(), 40);
        for _ in 0..10 {
            g.tick(sample(0.9, 0.5, 8));
        }
        // concurrency 2 -> base 10, clamped nothing; 10 * max(1, 0) = 10.
        assert_eq!(g.batch_size(), 10);
    }

    #[test]
    fn in_flight_overload_shrinks_batches() {
        let g = governor();
        let _guards: Vec<_> = (0..50).map(|_| g.track()).collect();
        assert!(g.batch_size() <= 25);
    }
}
