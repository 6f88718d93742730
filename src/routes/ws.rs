// WebSocket live stream: forwarded samples and connection-state changes

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tokio::time::{Duration, timeout};

use super::AppState;
use crate::worker::{EngineHandle, LiveEvent};

pub(super) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Decrements the /ws/live connection count on drop (connect = +1, drop = -1).
struct WsLiveGuard(Arc<AtomicUsize>);

impl Drop for WsLiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

pub(super) async fn ws_live(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let tx = state.live_tx.clone();
    let conn_count = state.ws_live_connections.clone();
    let engine = state.engine.clone();
    ws.on_upgrade(move |socket| async move {
        // subscribe before the welcome frame so no event falls in between
        let mut rx = tx.subscribe();
        if let Err(e) = stream_live(socket, &mut rx, conn_count, engine).await {
            tracing::info!("Live stream error: {}", e);
        }
    })
}

type WsSender = SplitSink<WebSocket, Message>;

async fn send(sender: &mut WsSender, message: Message) -> bool {
    matches!(timeout(WS_SEND_TIMEOUT, sender.send(message)).await, Ok(Ok(())))
}

async fn stream_live(
    socket: WebSocket,
    rx: &mut broadcast::Receiver<LiveEvent>,
    conn_count: Arc<AtomicUsize>,
    engine: EngineHandle,
) -> anyhow::Result<()> {
    conn_count.fetch_add(1, Ordering::Relaxed);
    let _guard = WsLiveGuard(conn_count);
    tracing::info!("Client connected to live stream");
    let (mut sender, mut receiver) = socket.split();

    // current state first
    if let Ok(status) = engine.status().await {
        let welcome = LiveEvent::State {
            state: status.state,
            online: status.online,
        };
        let json = serde_json::to_string(&welcome)?;
        if !send(&mut sender, Message::Text(json.into())).await {
            return Ok(());
        }
    }

    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        let json = serde_json::to_string(&event)?;
                        if !send(&mut sender, Message::Text(json.into())).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("WebSocket /ws/live client lagged, skipped {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // clients only listen; anything else is ignored
                    Some(Ok(_)) => {}
                }
            }
            _ = ping_interval.tick() => {
                if !send(&mut sender, Message::Ping(Bytes::new())).await {
                    break;
                }
            }
        }
    }
    Ok(())
}
