//! Manually advanced wall clock

use chrono::{DateTime, Duration, TimeZone, Utc};
use corider_core::Clock;
use parking_lot::Mutex;

/// Wall clock that only moves when a test advances it
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Clock frozen at 2025-01-06 08:00 UTC
    pub fn morning() -> Self {
        Self::new(Utc.with_ymd_and_hms(2025, 1, 6, 8, 0, 0).unwrap())
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::morning()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
