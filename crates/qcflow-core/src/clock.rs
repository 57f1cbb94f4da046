//! Time source for every timestamp the core writes.
//!
//! Timestamps are integer microseconds since the Unix epoch. Each operation
//! reads the clock once and stamps all rows it writes with that value.

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync {
    fn now_us(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_us(&self) -> i64 {
        Utc::now().timestamp_micros()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct FixedClock {
    now_us: AtomicI64,
}

impl FixedClock {
    #[must_use]
    pub const fn new(now_us: i64) -> Self {
        Self {
            now_us: AtomicI64::new(now_us),
        }
    }

    pub fn set(&self, now_us: i64) {
        self.now_us.store(now_us, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_us: i64) {
        self.now_us.fetch_add(delta_us, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_us(&self) -> i64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

/// Convert stored microseconds to a UTC timestamp.
#[must_use]
pub fn to_utc(us: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us)
}

/// Render stored microseconds in the plant's fixed zone.
#[must_use]
pub fn to_plant_time(us: i64, utc_offset_minutes: i32) -> Option<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(utc_offset_minutes.checked_mul(60)?)?;
    let utc = to_utc(us)?;
    Some(offset.from_utc_datetime(&utc.naive_utc()))
}

#[cfg(test)]
mod tests {
    use super::{Clock, FixedClock, SystemClock, to_plant_time, to_utc};

    #[test]
    fn fixed_clock_is_settable_and_advanceable() {
        let clock = FixedClock::new(1_000);
        assert_eq!(clock.now_us(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_us(), 1_500);
        clock.set(42);
        assert_eq!(clock.now_us(), 42);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_us() > 1_577_836_800_000_000);
    }

    #[test]
    fn plant_time_applies_offset() {
        // 2024-01-01T00:00:00Z
        let us = 1_704_067_200_000_000;
        let utc = to_utc(us).expect("valid timestamp");
        assert_eq!(utc.to_rfc3339(), "2024-01-01T00:00:00+00:00");

        let local = to_plant_time(us, 420).expect("valid offset");
        assert_eq!(local.to_rfc3339(), "2024-01-01T07:00:00+07:00");
        assert!(to_plant_time(us, 100_000).is_none());
    }
}
