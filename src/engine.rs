// Engine facade: one context object owning buffer, liveness, rollup and snapshot.
// Everything here is synchronous; the worker task serializes access.

use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::aggregation::{bucketed_series, raw_series};
use crate::liveness::{ConnectionState, LivenessConfig, LivenessDetector, Verdict};
use crate::models::{Field, Resolution, Sample, Series, UnknownField, UnknownResolution};
use crate::normalizer::{RawEvent, normalize};
use crate::ring_buffer::RingBuffer;
use crate::rollup::{DailyRollup, DayRecord, RollupConfig, RollupStore};
use crate::scheduler::{Clock, local_date};
use crate::snapshot::{SaveOutcome, SnapshotBackend, SnapshotConfig, SnapshotStore};
use crate::source::{ContextId, Delivery, DeliveryTx, PushSource, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Resolution(#[from] UnknownResolution),
    #[error(transparent)]
    Field(#[from] UnknownField),
}

/// Parses the wire names of a query, e.g. `("sixHour", "powerFactor")`.
pub fn parse_query(resolution: &str, field: &str) -> Result<(Resolution, Field), QueryError> {
    Ok((resolution.parse()?, field.parse()?))
}

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub buffer_capacity: usize,
    pub liveness: LivenessConfig,
    pub rollup: RollupConfig,
    pub snapshot: SnapshotConfig,
    /// Offset used for bucket alignment, labels and calendar days.
    pub utc_offset: FixedOffset,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 300,
            liveness: LivenessConfig::default(),
            rollup: RollupConfig::default(),
            snapshot: SnapshotConfig::default(),
            utc_offset: Utc.fix(),
        }
    }
}

pub struct EngineDeps {
    pub clock: Arc<dyn Clock>,
    pub source: Arc<dyn PushSource>,
    pub rollup_store: Arc<dyn RollupStore>,
    pub snapshot_backend: Box<dyn SnapshotBackend>,
}

/// What became of one push.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestOutcome {
    /// Accepted into the buffer, rollup and snapshot throttle.
    Forwarded(Sample),
    /// Not forwarded; the verdict says why.
    Held(Verdict),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub context: Option<ContextId>,
    pub state: ConnectionState,
    pub online: bool,
    pub last_fresh_ms: Option<i64>,
    pub buffer_len: usize,
    pub appended_total: u64,
}

pub struct Engine {
    clock: Arc<dyn Clock>,
    source: Arc<dyn PushSource>,
    delivery_tx: mpsc::UnboundedSender<Delivery>,
    generation: u64,
    context: Option<ContextId>,
    subscription: Option<Subscription>,
    buffer: RingBuffer<Sample>,
    liveness: LivenessDetector,
    rollup: DailyRollup,
    snapshot: SnapshotStore,
    offset: FixedOffset,
}

impl Engine {
    /// Returns the engine and the receiving end of its delivery channel.
    pub fn new(config: EngineConfig, deps: EngineDeps) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        let engine = Self {
            clock: deps.clock,
            source: deps.source,
            delivery_tx,
            generation: 0,
            context: None,
            subscription: None,
            buffer: RingBuffer::new(config.buffer_capacity),
            liveness: LivenessDetector::new(config.liveness),
            rollup: DailyRollup::new(config.rollup, deps.rollup_store),
            snapshot: SnapshotStore::new(deps.snapshot_backend, config.snapshot, config.utc_offset),
            offset: config.utc_offset,
        };
        (engine, delivery_rx)
    }

    fn today(&self, now_ms: i64) -> NaiveDate {
        local_date(now_ms, self.offset)
    }

    pub fn restore_rollups(&mut self, records: Vec<DayRecord>) {
        let today = self.today(self.clock.now_ms());
        self.rollup.restore(records, today);
    }

    /// Seeds the buffer from the local snapshot written for the current context. Call after the
    /// initial `switch_context`. Returns the number of samples restored.
    pub fn load_snapshot(&mut self) -> usize {
        let samples = self.snapshot.load(self.clock.now_ms());
        self.buffer.extend(samples);
        self.buffer.len()
    }

    pub fn ingest(&mut self, raw: &RawEvent) -> IngestOutcome {
        let readings = normalize(raw);
        let now = self.clock.now_ms();
        let verdict = self.liveness.observe(&readings, now);
        if verdict != Verdict::Fresh {
            debug!(verdict = ?verdict, state = ?self.liveness.state(), "push held");
            return IngestOutcome::Held(verdict);
        }

        let sample = Sample::new(now, readings);
        let today = self.today(now);
        self.buffer.append(sample);
        self.rollup.accumulate(&sample, today);
        if let Some(SaveOutcome::Failed) = self.snapshot.record_accepted(&mut self.buffer) {
            debug!(buffer_len = self.buffer.len(), "throttled snapshot not written");
        }
        IngestOutcome::Forwarded(sample)
    }

    /// Ingests a delivery unless it belongs to a superseded subscription.
    pub fn handle_delivery(&mut self, delivery: Delivery) -> Option<IngestOutcome> {
        if delivery.generation != self.generation {
            debug!(
                generation = delivery.generation,
                current = self.generation,
                "stale delivery dropped"
            );
            return None;
        }
        Some(self.ingest(&delivery.event))
    }

    pub fn query(&self, resolution: Resolution, field: Field) -> Series {
        let now = self.clock.now_ms();
        match resolution {
            Resolution::Raw => raw_series(self.buffer.iter(), field, self.offset),
            Resolution::Day => self.rollup.series(field, self.today(now)),
            bucketed => match bucketed.bucket_spec() {
                Some(spec) => bucketed_series(self.buffer.iter(), field, spec, now, self.offset),
                None => raw_series(self.buffer.iter(), field, self.offset),
            },
        }
    }

    /// Moves to another context. Returns `false` when already on it.
    pub fn switch_context(&mut self, context: ContextId) -> bool {
        if self.context.as_ref() == Some(&context) {
            return false;
        }
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        self.generation += 1;
        self.buffer.clear();
        self.liveness.reset();
        self.snapshot.set_context(Some(context.clone()));

        let tx = DeliveryTx::new(self.generation, self.delivery_tx.clone());
        self.subscription = Some(self.source.subscribe(&context, tx));
        info!(
            context = %context,
            previous = ?self.context.as_ref().map(ContextId::as_str),
            generation = self.generation,
            "context switched"
        );
        self.context = Some(context);
        true
    }

    pub fn check_heartbeat(&mut self) -> Option<ConnectionState> {
        let changed = self.liveness.check_heartbeat(self.clock.now_ms());
        if let Some(state) = changed {
            info!(
                state = ?state,
                last_fresh_ms = ?self.liveness.last_fresh_ms(),
                "heartbeat expired"
            );
        }
        changed
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.liveness.state();
        EngineStatus {
            context: self.context.clone(),
            state,
            online: state.is_online(),
            last_fresh_ms: self.liveness.last_fresh_ms(),
            buffer_len: self.buffer.len(),
            appended_total: self.buffer.appended_total(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.liveness.state()
    }

    pub fn context(&self) -> Option<&ContextId> {
        self.context.as_ref()
    }

    pub fn buffer(&self) -> &RingBuffer<Sample> {
        &self.buffer
    }

    pub fn rollup(&self) -> &DailyRollup {
        &self.rollup
    }

    /// Detaches from the source, writes the snapshot and flushes the active day.
    pub fn shutdown(&mut self) -> SaveOutcome {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        let outcome = self.snapshot.save(&mut self.buffer);
        self.rollup.flush_active();
        info!(
            outcome = ?outcome,
            buffer_len = self.buffer.len(),
            "engine shut down"
        );
        outcome
    }
}
