//! Time sources.
//!
//! Every component that schedules deferred work reads time through a
//! [`Clock`] so that tests can substitute a [`ManualClock`] and step
//! virtual time deterministically.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use std::fmt::Debug;
use std::time::Duration;

/// Source of the current time.
pub trait Clock: Send + Sync + Debug {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Current time as Unix milliseconds.
    fn now_ms(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// Clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Virtual clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Create a clock frozen at the given Unix milliseconds.
    ///
    /// Out-of-range values fall back to the Unix epoch.
    pub fn at_epoch_ms(ms: i64) -> Self {
        let start = Utc
            .timestamp_millis_opt(ms)
            .single()
            .unwrap_or_default();
        Self::new(start)
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now += chrono::Duration::milliseconds(by.as_millis() as i64);
    }

    /// Jump to an absolute time. Moving backwards is ignored.
    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.write();
        if to > *now {
            *now = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}
