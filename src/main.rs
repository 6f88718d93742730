use anyhow::Result;
use meterstream::*;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    normalizer::validate_mapping(&normalizer::FIELD_MAP)?;
    tracing::info!(
        name = version::NAME,
        version = version::VERSION,
        utc_offset = %app_config.utc_offset(),
        "starting"
    );

    let rollup_repo = Arc::new(rollup::repo::RollupRepo::connect(&app_config.rollup.path).await?);
    rollup_repo.init().await?;
    let stored_days = rollup_repo.load_all().await?;
    let rollup_store = Arc::new(rollup::repo::SqliteRollupStore::new(rollup_repo.clone())?);

    let snapshot_backend = snapshot::FileBackend::new(
        &app_config.snapshot.dir,
        app_config.snapshot.max_bytes,
    )?;

    let hub = source::HubSource::with_replay_capacity(app_config.source.replay_capacity);
    let (mut engine, deliveries) = engine::Engine::new(
        app_config.engine_config(),
        engine::EngineDeps {
            clock: Arc::new(scheduler::SystemClock),
            source: Arc::new(hub.clone()),
            rollup_store: rollup_store.clone(),
            snapshot_backend: Box::new(snapshot_backend),
        },
    );
    engine.restore_rollups(stored_days);
    let initial_context: source::ContextId = app_config.source.initial_context.parse()?;
    engine.switch_context(initial_context);
    let restored = engine.load_snapshot();
    tracing::info!(restored, "buffer restored from snapshot");

    let vacuum_handle = rollup::vacuum::spawn(rollup_repo.clone(), app_config.vacuum_schedule());

    let (live_tx, _) =
        broadcast::channel::<worker::LiveEvent>(app_config.publishing.broadcast_capacity);
    let ws_live_connections = Arc::new(AtomicUsize::new(0));
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let (engine_handle, worker_handle) = worker::spawn(
        worker::WorkerDeps {
            engine,
            deliveries,
            live_tx: live_tx.clone(),
            ws_connections: ws_live_connections.clone(),
            shutdown_rx,
        },
        app_config.worker_config(),
    );

    let app = routes::app(engine_handle, hub, live_tx, ws_live_connections);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = shutdown_signal() => {
            tracing::info!("Received shutdown signal");
        }
    }

    // final snapshot + rollup flush happen in the worker; then wait for the rollup writes it queued
    let _ = shutdown_tx.send(());
    if let Err(e) = worker_handle.await {
        tracing::warn!(error = %e, "engine worker did not shut down cleanly");
    }
    rollup_store.drain().await;
    vacuum_handle.abort();
    tracing::info!("Shutdown complete");

    Ok(())
}
