use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Source of wall-clock time for anything that makes time-based decisions
/// (cache freshness, session lookup, idle reaping).
///
/// Production code uses [`SystemClock`]; tests pin time with
/// [`ManualClock`].
pub trait Clock: Send + Sync {
    /// Current instant in UTC.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. For tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock pinned to `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Advance the clock by `seconds`.
    pub fn advance_secs(&self, seconds: i64) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now += chrono::TimeDelta::seconds(seconds);
    }

    /// Pin the clock to an exact instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().expect("clock mutex poisoned") = instant;
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}
