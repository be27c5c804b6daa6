use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use quotehub_types::{BrokerError, RateLimitConfig};

#[derive(Debug)]
struct WindowState {
    window_start: Instant,
    count: u64,
}

/// Active-connection gauge with a sliding-window admission budget.
///
/// Acquisition hands back an RAII [`ConnectionSlot`] whose `Drop` releases
/// the gauge exactly once, on every exit path including panics.
#[derive(Debug)]
pub struct ConnectionGauge {
    active: AtomicI64,
    cfg: RateLimitConfig,
    window: Mutex<WindowState>,
}

impl ConnectionGauge {
    /// Gauge with the given admission budget.
    #[must_use]
    pub fn new(cfg: RateLimitConfig) -> Self {
        Self {
            active: AtomicI64::new(0),
            cfg,
            window: Mutex::new(WindowState {
                window_start: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Connections currently holding a slot.
    #[must_use]
    pub fn active(&self) -> i64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Admit one request: check the window budget, then bump the gauge.
    ///
    /// # Errors
    /// `RateLimited` when the window budget is exhausted.
    pub fn acquire(&self) -> Result<ConnectionSlot<'_>, BrokerError> {
        {
            let mut window = self.window.lock().expect("window lock poisoned");
            if window.window_start.elapsed() >= self.cfg.window {
                window.window_start = Instant::now();
                window.count = 0;
            }
            if window.count >= self.cfg.max_connections {
                return Err(BrokerError::RateLimited {
                    limit: self.cfg.max_connections,
                    window_ms: u64::try_from(self.cfg.window.as_millis()).unwrap_or(u64::MAX),
                });
            }
            window.count += 1;
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(ConnectionSlot { gauge: self })
    }
}

/// Scoped hold on one connection slot; releasing is its `Drop`, which makes
/// double-release unrepresentable.
#[derive(Debug)]
pub struct ConnectionSlot<'a> {
    gauge: &'a ConnectionGauge,
}

impl Drop for ConnectionSlot<'_> {
    fn drop(&mut self) {
        self.gauge.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn gauge(max: u64, window_ms: u64) -> ConnectionGauge {
        ConnectionGauge::new(RateLimitConfig {
            max_connections: max,
            window: Duration::from_millis(window_ms),
        })
    }

    #[test]
    fn slot_releases_on_drop() {
        let g = gauge(10, 60_000);
        {
            let _slot = g.acquire().unwrap();
            assert_eq!(g.active(), 1);
        }
        assert_eq!(g.active(), 0);
    }

    #[test]
    fn slot_releases_on_panic() {
        let g = gauge(10, 60_000);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _slot = g.acquire().unwrap();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(g.active(), 0);
    }

    #[test]
    fn window_budget_rejects_past_the_limit() {
        let g = gauge(2, 60_000);
        let _a = g.acquire().unwrap();
        let _b = g.acquire().unwrap();
        let err = g.acquire().unwrap_err();
        assert!(matches!(err, BrokerError::RateLimited { .. }));
    }

    #[test]
    fn window_budget_resets_after_the_window() {
        let g = gauge(1, 20);
        drop(g.acquire().unwrap());
        assert!(g.acquire().is_err());
        std::thread::sleep(Duration::from_millis(30));
        assert!(g.acquire().is_ok());
    }
}
