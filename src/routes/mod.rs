// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

use crate::source::HubSource;
use crate::worker::{EngineHandle, LiveEvent};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) engine: EngineHandle,
    pub(crate) hub: HubSource,
    pub(crate) live_tx: broadcast::Sender<LiveEvent>,
    pub(crate) ws_live_connections: Arc<AtomicUsize>,
}

pub fn app(
    engine: EngineHandle,
    hub: HubSource,
    live_tx: broadcast::Sender<LiveEvent>,
    ws_live_connections: Arc<AtomicUsize>,
) -> Router {
    let state = AppState {
        engine,
        hub,
        live_tx,
        ws_live_connections,
    };
    Router::new()
        .route("/", get(|| async { crate::version::banner() })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/status", get(http::status_handler)) // GET /api/status
        .route("/api/series", get(http::series_handler)) // GET /api/series?resolution=&field=
        .route("/api/context", post(http::switch_context_handler)) // POST /api/context
        .route(
            "/api/devices/{device_id}/realtime",
            post(http::ingest_handler),
        ) // POST /api/devices/{device_id}/realtime
        .route("/ws/live", get(ws::ws_live)) // WS /ws/live
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
