use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use tracing::{info, warn};

use quotehub_types::BreakerConfig;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation; calls pass through.
    Closed,
    /// Failure threshold breached; calls are suppressed.
    Open,
    /// Cooldown elapsed; a probe call is allowed.
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    // Sliding window of recent outcomes, true = failure.
    window: VecDeque<bool>,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
}

/// Sliding-window circuit breaker guarding the stream transform stage.
///
/// Opens on a failure ratio over the window or a run of consecutive
/// failures; half-opens after the reset timeout; one success closes it.
pub struct CircuitBreaker {
    cfg: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Breaker with the given thresholds.
    #[must_use]
    pub fn new(cfg: BreakerConfig) -> Self {
        Self {
            cfg,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                window: VecDeque::new(),
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Current state, transitioning `Open -> HalfOpen` when the cooldown
    /// has elapsed.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        if inner.state == BreakerState::Open
            && inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.cfg.reset_timeout)
        {
            info!(target = "quotehub::breaker", "cooldown elapsed; half-open");
            inner.state = BreakerState::HalfOpen;
        }
        inner.state
    }

    /// Whether a call may go downstream right now.
    pub fn allow(&self) -> bool {
        self.state() != BreakerState::Open
    }

    /// Record a successful downstream call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.consecutive_failures = 0;
        Self::push(&mut inner.window, false, self.cfg.window);
        if inner.state == BreakerState::HalfOpen {
            info!(target = "quotehub::breaker", "probe succeeded; closing");
            inner.state = BreakerState::Closed;
            inner.window.clear();
            inner.opened_at = None;
        }
    }

    /// Record a failed downstream call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.consecutive_failures += 1;
        Self::push(&mut inner.window, true, self.cfg.window);

        if inner.state == BreakerState::HalfOpen {
            warn!(target = "quotehub::breaker", "probe failed; reopening");
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
            return;
        }
        if inner.state != BreakerState::Closed {
            return;
        }

        let failures = inner.window.iter().filter(|f| **f).count();
        let ratio = failures as f64 / inner.window.len().max(1) as f64;
        let window_trips = inner.window.len() >= self.cfg.window && ratio >= self.cfg.failure_rate;
        let run_trips = inner.consecutive_failures >= self.cfg.consecutive_failures;
        if window_trips || run_trips {
            warn!(
                target = "quotehub::breaker",
                failures,
                window = inner.window.len(),
                consecutive = inner.consecutive_failures,
                "failure threshold breached; opening"
            );
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    fn push(window: &mut VecDeque<bool>, failed: bool, cap: usize) {
        window.push_back(failed);
        while window.len() > cap.max(1) {
            window.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn breaker(reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            reset_timeout: Duration::from_millis(reset_ms),
            ..BreakerConfig::default()
        })
    }

    #[test]
    fn five_consecutive_failures_open_the_breaker() {
        let b = breaker(30_000);
        for _ in 0..4 {
            b.record_failure();
            assert!(b.allow());
        }
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow());
    }

    #[test]
    fn window_failure_rate_opens_the_breaker() {
        let b = breaker(30_000);
        // Alternate to keep the consecutive counter low while filling the
        // window at a 50% failure rate.
        for _ in 0..10 {
            b.record_failure();
            b.record_success();
        }
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn half_open_probe_success_closes() {
        let b = breaker(10);
        for _ in 0..5 {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Open);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let b = breaker(10);
        for _ in 0..5 {
            b.record_failure();
        }
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn successes_reset_the_consecutive_counter() {
        let b = breaker(30_000);
        for _ in 0..4 {
            b.record_failure();
        }
        b.record_success();
        for _ in 0..4 {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }
}
