// Engine worker: the single task that owns the `Engine`.
// Push deliveries, HTTP commands, heartbeat ticks and shutdown are serialized through one select loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Duration, Instant, interval};

use crate::engine::{Engine, EngineStatus, IngestOutcome};
use crate::liveness::ConnectionState;
use crate::models::{Field, Resolution, Sample, Series};
use crate::source::{ContextId, Delivery};

/// Rate limit for the "no live subscribers" debug line.
const NO_RECEIVERS_WARN_INTERVAL: Duration = Duration::from_secs(60);

/// Pushed to `/ws/live` subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LiveEvent {
    Sample { sample: Sample },
    State { state: ConnectionState, online: bool },
}

impl LiveEvent {
    fn state(state: ConnectionState) -> Self {
        LiveEvent::State {
            state,
            online: state.is_online(),
        }
    }
}

pub enum Command {
    Query {
        resolution: Resolution,
        field: Field,
        reply: oneshot::Sender<Series>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    SwitchContext {
        context: ContextId,
        reply: oneshot::Sender<EngineStatus>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("engine worker is not running")]
pub struct WorkerStopped;

/// Cloneable front door to the worker, held by HTTP handlers.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
}

impl EngineHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, WorkerStopped> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| WorkerStopped)?;
        rx.await.map_err(|_| WorkerStopped)
    }

    pub async fn query(&self, resolution: Resolution, field: Field) -> Result<Series, WorkerStopped> {
        self.request(|reply| Command::Query {
            resolution,
            field,
            reply,
        })
        .await
    }

    pub async fn status(&self) -> Result<EngineStatus, WorkerStopped> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub async fn switch_context(&self, context: ContextId) -> Result<EngineStatus, WorkerStopped> {
        self.request(|reply| Command::SwitchContext { context, reply })
            .await
    }
}

pub struct WorkerDeps {
    pub engine: Engine,
    pub deliveries: mpsc::UnboundedReceiver<Delivery>,
    pub live_tx: broadcast::Sender<LiveEvent>,
    pub ws_connections: Arc<AtomicUsize>,
    pub shutdown_rx: oneshot::Receiver<()>,
}

pub struct WorkerConfig {
    pub heartbeat_check_interval_ms: u64,
    pub command_capacity: usize,
    /// How often to log engine stats at INFO (real seconds).
    pub stats_log_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat_check_interval_ms: 2_000,
            command_capacity: 64,
            stats_log_interval_secs: 60,
        }
    }
}

struct Publisher {
    tx: broadcast::Sender<LiveEvent>,
    last_no_receivers_warn: Option<Instant>,
}

impl Publisher {
    fn send(&mut self, event: LiveEvent) {
        if self.tx.send(event).is_err() {
            let should_warn = self
                .last_no_receivers_warn
                .is_none_or(|t| t.elapsed() >= NO_RECEIVERS_WARN_INTERVAL);
            if should_warn {
                tracing::debug!(
                    operation = "broadcast_live",
                    "No active WebSocket clients; broadcast channel has no receivers"
                );
                self.last_no_receivers_warn = Some(Instant::now());
            }
        }
    }
}

/// Spawns the worker. The returned handle resolves to the engine after its final
/// snapshot and rollup flush.
pub fn spawn(deps: WorkerDeps, config: WorkerConfig) -> (EngineHandle, tokio::task::JoinHandle<Engine>) {
    let WorkerDeps {
        mut engine,
        mut deliveries,
        live_tx,
        ws_connections,
        mut shutdown_rx,
    } = deps;
    let (command_tx, mut commands) = mpsc::channel(config.command_capacity.max(1));
    let heartbeat_every = Duration::from_millis(config.heartbeat_check_interval_ms.max(1));
    let stats_log_every = Duration::from_secs(config.stats_log_interval_secs.max(1));

    let handle = tokio::spawn(async move {
        let mut heartbeat = interval(heartbeat_every);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stats_log_tick = interval(stats_log_every);
        stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut publisher = Publisher {
            tx: live_tx,
            last_no_receivers_warn: None,
        };
        let mut stale_dropped: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => {
                    tracing::debug!("Engine worker shutting down");
                    break;
                }
                Some(delivery) = deliveries.recv() => {
                    let before = engine.state();
                    match engine.handle_delivery(delivery) {
                        Some(IngestOutcome::Forwarded(sample)) => {
                            publisher.send(LiveEvent::Sample { sample });
                        }
                        Some(IngestOutcome::Held(_)) => {}
                        None => stale_dropped += 1,
                    }
                    let after = engine.state();
                    if after != before {
                        publisher.send(LiveEvent::state(after));
                    }
                }
                Some(command) = commands.recv() => {
                    handle_command(&mut engine, command, &mut publisher);
                }
                _ = heartbeat.tick() => {
                    if let Some(state) = engine.check_heartbeat() {
                        publisher.send(LiveEvent::state(state));
                    }
                }
                _ = stats_log_tick.tick() => {
                    let status = engine.status();
                    tracing::info!(
                        ws_live_clients = ws_connections.load(Ordering::Relaxed),
                        context = ?status.context.as_ref().map(ContextId::as_str),
                        state = ?status.state,
                        buffer_len = status.buffer_len,
                        appended_total = status.appended_total,
                        stale_dropped,
                        "engine stats"
                    );
                }
            }
        }

        engine.shutdown();
        engine
    });

    (EngineHandle { commands: command_tx }, handle)
}

fn handle_command(engine: &mut Engine, command: Command, publisher: &mut Publisher) {
    // a dropped reply receiver only means the HTTP caller went away
    match command {
        Command::Query {
            resolution,
            field,
            reply,
        } => {
            let _ = reply.send(engine.query(resolution, field));
        }
        Command::Status { reply } => {
            let _ = reply.send(engine.status());
        }
        Command::SwitchContext { context, reply } => {
            let before = engine.state();
            engine.switch_context(context);
            if engine.state() != before {
                publisher.send(LiveEvent::state(engine.state()));
            }
            let _ = reply.send(engine.status());
        }
    }
}
