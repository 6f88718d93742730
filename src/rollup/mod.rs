// Daily rollup: running per-day sums independent of the bounded ingest buffer.
// Durable writes go through `RollupStore` and are fire-and-forget; pruning deletes, not hides.

pub mod repo;
pub mod vacuum;

use chrono::{Days, NaiveDate};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use crate::aggregation::round4;
use crate::models::{Field, LabelFormat, Readings, Resolution, Sample, Series};
use crate::scheduler::EveryN;

/// Durable form of one day: field averages (4 dp) plus how many samples produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct DayRecord {
    pub date: NaiveDate,
    pub averages: Readings,
    pub sample_count: u64,
}

/// Sink for day records. Implementations must not block the caller.
pub trait RollupStore: Send + Sync {
    fn put(&self, record: DayRecord);
    fn remove(&self, date: NaiveDate);
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayAggregate {
    pub date: NaiveDate,
    pub sums: Readings,
    pub count: u64,
    /// Set once the day has rolled over and its last record was written.
    pub finalized: bool,
}

impl DayAggregate {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            sums: Readings::default(),
            count: 0,
            finalized: false,
        }
    }

    /// Rebuilds running sums from a stored record. Records without a count weigh as one sample.
    fn from_record(record: &DayRecord) -> Self {
        let count = record.sample_count.max(1);
        Self {
            date: record.date,
            sums: record.averages.map(|avg| avg * count as f64),
            count,
            finalized: false,
        }
    }

    pub fn average(&self) -> Option<Readings> {
        (self.count > 0).then(|| self.sums.map(|sum| round4(sum / self.count as f64)))
    }

    pub fn to_record(&self) -> Option<DayRecord> {
        Some(DayRecord {
            date: self.date,
            averages: self.average()?,
            sample_count: self.count,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RollupConfig {
    /// Persist the active day's partial average every this many samples.
    pub flush_every: u64,
    /// Days strictly older than `today - retention_days` are pruned.
    pub retention_days: u32,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            flush_every: 300,
            retention_days: 7,
        }
    }
}

pub struct DailyRollup {
    config: RollupConfig,
    days: BTreeMap<NaiveDate, DayAggregate>,
    active: Option<NaiveDate>,
    flush: EveryN,
    store: Arc<dyn RollupStore>,
}

impl DailyRollup {
    pub fn new(config: RollupConfig, store: Arc<dyn RollupStore>) -> Self {
        Self {
            config,
            days: BTreeMap::new(),
            active: None,
            flush: EveryN::new(config.flush_every),
            store,
        }
    }

    /// Seeds from durable records at startup. Expired records are deleted from the store;
    /// today's record reopens the day so accumulation continues from it.
    pub fn restore(&mut self, records: Vec<DayRecord>, today: NaiveDate) {
        let cutoff = self.cutoff(today);
        let mut expired = 0usize;
        for record in records {
            if record.date < cutoff {
                self.store.remove(record.date);
                expired += 1;
                continue;
            }
            let mut agg = DayAggregate::from_record(&record);
            agg.finalized = record.date != today;
            self.days.insert(record.date, agg);
        }
        if let Some(agg) = self.days.get(&today) {
            self.flush.resume_at(agg.count);
            self.active = Some(today);
        }
        info!(
            restored_days = self.days.len(),
            expired_days = expired,
            "daily rollup restored"
        );
    }

    pub fn accumulate(&mut self, sample: &Sample, today: NaiveDate) {
        if let Some(prev) = self.active
            && prev != today
        {
            self.finalize(prev);
            self.prune(today);
            self.flush.reset();
        }
        self.active = Some(today);

        let agg = self
            .days
            .entry(today)
            .or_insert_with(|| DayAggregate::new(today));
        agg.sums.accumulate(&sample.readings);
        agg.count += 1;

        if self.flush.tick() {
            self.flush_day(today);
        }
    }

    /// Writes the active day regardless of the sample-count threshold (shutdown path).
    pub fn flush_active(&mut self) {
        if let Some(day) = self.active {
            self.flush_day(day);
            self.flush.reset();
        }
    }

    /// Drops days older than the retention cutoff from memory and the store.
    pub fn prune(&mut self, today: NaiveDate) -> usize {
        let cutoff = self.cutoff(today);
        let stale: Vec<NaiveDate> = self.days.range(..cutoff).map(|(d, _)| *d).collect();
        for date in &stale {
            self.days.remove(date);
            self.store.remove(*date);
        }
        if !stale.is_empty() {
            info!(pruned_days = stale.len(), cutoff = %cutoff, "daily rollup pruned");
        }
        stale.len()
    }

    pub fn day(&self, date: NaiveDate) -> Option<&DayAggregate> {
        self.days.get(&date)
    }

    pub fn days(&self) -> impl Iterator<Item = &DayAggregate> {
        self.days.values()
    }

    pub fn active_day(&self) -> Option<NaiveDate> {
        self.active
    }

    /// The last 7 calendar days ending `today`, oldest first; `None` for days without data.
    pub fn series(&self, field: Field, today: NaiveDate) -> Series {
        let window = Resolution::Day
            .bucket_spec()
            .map(|s| s.window_count)
            .unwrap_or(7);
        let mut out = Series::with_capacity(window);
        for back in (0..window as u64).rev() {
            let Some(date) = today.checked_sub_days(Days::new(back)) else {
                continue;
            };
            let value = self
                .days
                .get(&date)
                .and_then(DayAggregate::average)
                .map(|avg| avg.get(field));
            out.push(
                date.format(LabelFormat::DayMonth.pattern()).to_string(),
                value,
            );
        }
        out
    }

    fn finalize(&mut self, date: NaiveDate) {
        if let Some(agg) = self.days.get_mut(&date) {
            agg.finalized = true;
        }
        self.flush_day(date);
    }

    fn flush_day(&self, date: NaiveDate) {
        let Some(record) = self.days.get(&date).and_then(DayAggregate::to_record) else {
            return;
        };
        debug!(
            operation = "flush_day",
            date = %record.date,
            sample_count = record.sample_count,
            "daily rollup flushed"
        );
        self.store.put(record);
    }

    fn cutoff(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_sub_days(Days::new(u64::from(self.config.retention_days)))
            .unwrap_or(NaiveDate::MIN)
    }
}

/// Non-durable store: keeps the latest record per day in memory.
#[derive(Debug, Default)]
pub struct MemoryRollupStore {
    records: Mutex<BTreeMap<NaiveDate, DayRecord>>,
    puts: Mutex<u64>,
}

impl MemoryRollupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DayRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, date: NaiveDate) -> Option<DayRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&date)
            .cloned()
    }

    /// Number of `put` calls so far.
    pub fn put_count(&self) -> u64 {
        *self.puts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RollupStore for MemoryRollupStore {
    fn put(&self, record: DayRecord) {
        *self.puts.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.date, record);
    }

    fn remove(&self, date: NaiveDate) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&date);
    }
}
