// Throttled local snapshot of the ingest buffer, so a restart picks up where it left off.
// Stored as ten parallel arrays under one versioned key, tagged with the context they came from.

mod backend;

pub use backend::{FileBackend, MemoryBackend, SnapshotBackend, SnapshotError};

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregation::format_label;
use crate::models::{Field, LabelFormat, Readings, Sample};
use crate::ring_buffer::RingBuffer;
use crate::scheduler::EveryN;
use crate::source::ContextId;

pub const SNAPSHOT_KEY: &str = "meterstream_buffer_v1";

const MS_PER_HOUR: i64 = 3_600_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextId>,
    pub labels: Vec<String>,
    pub timestamps: Vec<i64>,
    pub voltage: Vec<f64>,
    pub current: Vec<f64>,
    pub power: Vec<f64>,
    pub frequency: Vec<f64>,
    pub apparent: Vec<f64>,
    pub reactive: Vec<f64>,
    pub energy: Vec<f64>,
    pub power_factor: Vec<f64>,
}

impl PersistedSnapshot {
    pub fn from_samples<'a>(
        samples: impl IntoIterator<Item = &'a Sample>,
        offset: FixedOffset,
    ) -> Self {
        let mut out = PersistedSnapshot::default();
        for s in samples {
            out.labels
                .push(format_label(s.timestamp, LabelFormat::Clock, offset));
            out.timestamps.push(s.timestamp);
            for field in Field::ALL {
                out.column_mut(field).push(s.value(field));
            }
        }
        out
    }

    fn column(&self, field: Field) -> &Vec<f64> {
        match field {
            Field::Voltage => &self.voltage,
            Field::Current => &self.current,
            Field::Power => &self.power,
            Field::Frequency => &self.frequency,
            Field::Apparent => &self.apparent,
            Field::Reactive => &self.reactive,
            Field::Energy => &self.energy,
            Field::PowerFactor => &self.power_factor,
        }
    }

    fn column_mut(&mut self, field: Field) -> &mut Vec<f64> {
        match field {
            Field::Voltage => &mut self.voltage,
            Field::Current => &mut self.current,
            Field::Power => &mut self.power,
            Field::Frequency => &mut self.frequency,
            Field::Apparent => &mut self.apparent,
            Field::Reactive => &mut self.reactive,
            Field::Energy => &mut self.energy,
            Field::PowerFactor => &mut self.power_factor,
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// All ten arrays have the same length.
    pub fn is_consistent(&self) -> bool {
        let n = self.timestamps.len();
        self.labels.len() == n && Field::ALL.iter().all(|f| self.column(*f).len() == n)
    }

    /// Drops everything before the first timestamp `>= cutoff_ms`; empties when none qualify.
    pub fn prune_before(&mut self, cutoff_ms: i64) {
        let first = self
            .timestamps
            .iter()
            .position(|&t| t >= cutoff_ms)
            .unwrap_or(self.timestamps.len());
        if first == 0 {
            return;
        }
        self.labels.drain(..first);
        self.timestamps.drain(..first);
        for field in Field::ALL {
            self.column_mut(field).drain(..first);
        }
    }

    pub fn into_samples(self) -> Vec<Sample> {
        (0..self.timestamps.len())
            .map(|i| {
                Sample::new(
                    self.timestamps[i],
                    Readings::from_fn(|field| self.column(field)[i]),
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SnapshotConfig {
    /// Write after this many accepted samples.
    pub save_every: u64,
    /// Entries older than this are dropped on load.
    pub retention_hours: u32,
    /// Entries kept when a write fails and is retried.
    pub fallback_keep: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            save_every: 60,
            retention_hours: 24,
            fallback_keep: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// First write failed; history was cut to `kept` entries and the retry succeeded.
    Truncated { kept: usize },
    /// Both attempts failed; the error was swallowed.
    Failed,
}

pub struct SnapshotStore {
    backend: Box<dyn SnapshotBackend>,
    config: SnapshotConfig,
    throttle: EveryN,
    offset: FixedOffset,
    context: Option<ContextId>,
}

impl SnapshotStore {
    pub fn new(backend: Box<dyn SnapshotBackend>, config: SnapshotConfig, offset: FixedOffset) -> Self {
        Self {
            backend,
            config,
            throttle: EveryN::new(config.save_every),
            offset,
            context: None,
        }
    }

    /// Context stamped on every write and required of a snapshot on load.
    pub fn set_context(&mut self, context: Option<ContextId>) {
        self.context = context;
    }

    /// Reads the snapshot once at startup. Anything unreadable, schema-mismatched or written for
    /// another context is discarded wholesale; the rest is pruned to the retention window.
    pub fn load(&self, now_ms: i64) -> Vec<Sample> {
        let raw = match self.backend.read(SNAPSHOT_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, operation = "snapshot_load", "snapshot read failed");
                return Vec::new();
            }
        };
        let mut snapshot: PersistedSnapshot = match serde_json::from_str(&raw) {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, "snapshot schema mismatch, discarding");
                return Vec::new();
            }
        };
        if !snapshot.is_consistent() {
            debug!("snapshot arrays differ in length, discarding");
            return Vec::new();
        }
        if snapshot.context != self.context {
            info!(
                stored_context = ?snapshot.context.as_ref().map(ContextId::as_str),
                context = ?self.context.as_ref().map(ContextId::as_str),
                "snapshot belongs to another context, discarding"
            );
            return Vec::new();
        }
        let stored = snapshot.len();
        snapshot.prune_before(now_ms - i64::from(self.config.retention_hours) * MS_PER_HOUR);
        info!(
            stored,
            restored = snapshot.len(),
            "snapshot loaded"
        );
        snapshot.into_samples()
    }

    /// Counts one accepted sample; writes when the throttle fires.
    pub fn record_accepted(&mut self, buffer: &mut RingBuffer<Sample>) -> Option<SaveOutcome> {
        self.throttle
            .tick()
            .then(|| self.save(buffer))
    }

    /// Writes the whole buffer. On failure, cuts the buffer to the most recent
    /// `fallback_keep` entries and retries once.
    pub fn save(&mut self, buffer: &mut RingBuffer<Sample>) -> SaveOutcome {
        match self.write(buffer) {
            Ok(()) => return SaveOutcome::Saved,
            Err(e) => warn!(
                error = %e,
                operation = "snapshot_save",
                buffer_len = buffer.len(),
                "snapshot write failed; truncating history and retrying"
            ),
        }
        buffer.retain_last(self.config.fallback_keep);
        match self.write(buffer) {
            Ok(()) => SaveOutcome::Truncated { kept: buffer.len() },
            Err(e) => {
                warn!(error = %e, operation = "snapshot_save", "snapshot retry failed; giving up");
                SaveOutcome::Failed
            }
        }
    }

    fn write(&mut self, buffer: &RingBuffer<Sample>) -> Result<(), SnapshotError> {
        let mut snapshot = PersistedSnapshot::from_samples(buffer.iter(), self.offset);
        snapshot.context = self.context.clone();
        let payload = serde_json::to_string(&snapshot)?;
        self.backend.write(SNAPSHOT_KEY, &payload)
    }
}
