// Injectable time and throttling: wall clock, manual clock for tests, every-N counters.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of "now" in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Fires on every `period`-th tick.
#[derive(Debug, Clone)]
pub struct EveryN {
    period: u64,
    count: u64,
}

impl EveryN {
    pub fn new(period: u64) -> Self {
        Self {
            period: period.max(1),
            count: 0,
        }
    }

    pub fn tick(&mut self) -> bool {
        self.count += 1;
        if self.count >= self.period {
            self.count = 0;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Continues a count that already reached `ticks`, so the next fire lands on a multiple of the period.
    pub fn resume_at(&mut self, ticks: u64) {
        self.count = ticks % self.period;
    }

    pub fn pending(&self) -> u64 {
        self.count
    }
}

pub fn local_datetime(ts_ms: i64, offset: FixedOffset) -> DateTime<FixedOffset> {
    DateTime::<Utc>::from_timestamp_millis(ts_ms)
        .unwrap_or_default()
        .with_timezone(&offset)
}

/// Calendar date of `ts_ms` in the display time zone.
pub fn local_date(ts_ms: i64, offset: FixedOffset) -> NaiveDate {
    local_datetime(ts_ms, offset).date_naive()
}
