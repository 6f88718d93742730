// Shared test helpers

#![allow(dead_code)]

use meterstream::engine::{Engine, EngineConfig, EngineDeps};
use meterstream::normalizer::RawEvent;
use meterstream::rollup::MemoryRollupStore;
use meterstream::scheduler::ManualClock;
use meterstream::snapshot::FileBackend;
use meterstream::source::{ContextId, Delivery, HubSource};
use meterstream::worker::{self, EngineHandle, LiveEvent, WorkerConfig, WorkerDeps};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc, oneshot};

/// 2024-01-01T00:00:00Z
pub const T0: i64 = 1_704_067_200_000;

/// Provider payload with the given voltage; other fields fixed. Power is in kW on the wire.
pub fn raw_event(voltage: f64) -> RawEvent {
    serde_json::json!({
        "V1": voltage,
        "A1": "4.2",
        "P_SUM": 0.95,
        "FREQ": 50.0,
        "S_SUM": 1000.0,
        "Q_SUM": 120.0,
        "WH": 1234.5,
        "PF_SUM": 0.95,
    })
    .as_object()
    .cloned()
    .unwrap()
}

pub fn ctx(s: &str) -> ContextId {
    s.parse().unwrap()
}

pub struct TestEngine {
    pub engine: Engine,
    pub deliveries: mpsc::UnboundedReceiver<Delivery>,
    pub clock: Arc<ManualClock>,
    pub hub: HubSource,
    pub store: Arc<MemoryRollupStore>,
}

impl TestEngine {
    /// Feeds every queued delivery through the engine.
    pub fn drain_deliveries(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(d) = self.deliveries.try_recv() {
            self.engine.handle_delivery(d);
            handled += 1;
        }
        handled
    }

    /// `ingest` with the clock moved forward first.
    pub fn push_after(&mut self, delta_ms: i64, voltage: f64) -> meterstream::engine::IngestOutcome {
        self.clock.advance(delta_ms);
        self.engine.ingest(&raw_event(voltage))
    }
}

pub fn test_engine_at(
    config: EngineConfig,
    snapshot_dir: &Path,
    start_ms: i64,
    store: Arc<MemoryRollupStore>,
) -> TestEngine {
    let clock = Arc::new(ManualClock::new(start_ms));
    let hub = HubSource::new();
    let (engine, deliveries) = Engine::new(
        config,
        EngineDeps {
            clock: clock.clone(),
            source: Arc::new(hub.clone()),
            rollup_store: store.clone(),
            snapshot_backend: Box::new(FileBackend::new(snapshot_dir, None).unwrap()),
        },
    );
    TestEngine {
        engine,
        deliveries,
        clock,
        hub,
        store,
    }
}

pub fn test_engine(config: EngineConfig, dir: &TempDir) -> TestEngine {
    test_engine_at(config, dir.path(), T0, Arc::new(MemoryRollupStore::new()))
}

/// An engine running on its worker task, following `initial_context`.
pub struct TestWorker {
    pub handle: EngineHandle,
    pub join: tokio::task::JoinHandle<Engine>,
    pub live_tx: broadcast::Sender<LiveEvent>,
    pub ws_connections: Arc<AtomicUsize>,
    pub shutdown_tx: oneshot::Sender<()>,
    pub hub: HubSource,
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryRollupStore>,
    pub dir: TempDir,
}

pub fn spawn_worker(initial_context: &str, config: WorkerConfig) -> TestWorker {
    let dir = TempDir::new().unwrap();
    let TestEngine {
        mut engine,
        deliveries,
        clock,
        hub,
        store,
    } = test_engine(EngineConfig::default(), &dir);
    engine.switch_context(ctx(initial_context));

    let (live_tx, _) = broadcast::channel(64);
    let ws_connections = Arc::new(AtomicUsize::new(0));
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let (handle, join) = worker::spawn(
        WorkerDeps {
            engine,
            deliveries,
            live_tx: live_tx.clone(),
            ws_connections: ws_connections.clone(),
            shutdown_rx,
        },
        config,
    );
    TestWorker {
        handle,
        join,
        live_tx,
        ws_connections,
        shutdown_tx,
        hub,
        clock,
        store,
        dir,
    }
}
