// WebSocket stream of merged dashboard stats

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::time::{Duration, timeout};

use super::AppState;
use crate::models::DashboardStats;
use crate::pipeline;

pub(super) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub(super) async fn ws_stats(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let tx = state.stats_tx.clone();
    let welcome = pipeline::dashboard_stats(state.cache.as_ref());
    ws.on_upgrade(move |socket| async move {
        let mut rx = tx.subscribe();
        if let Err(e) = stream_stats(socket, &mut rx, welcome).await {
            tracing::info!("Stats stream error: {}", e);
        }
    })
}

async fn stream_stats(
    mut socket: WebSocket,
    rx: &mut broadcast::Receiver<DashboardStats>,
    welcome: Option<DashboardStats>,
) -> anyhow::Result<()> {
    tracing::info!("Client connected to stats stream");

    // New clients get the latest stats immediately instead of waiting a full
    // scrape interval.
    if let Some(stats) = welcome {
        let json = serde_json::to_string(&stats)?;
        let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Text(json.into()))).await;
        if r.is_err() || r.unwrap_or(Ok(())).is_err() {
            return Ok(());
        }
    }

    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(stats) => {
                        let json = serde_json::to_string(&stats)?;
                        let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Text(json.into()))).await;
                        if r.is_err() || r.unwrap_or(Ok(())).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("WebSocket /ws/stats client lagged, skipped {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = ping_interval.tick() => {
                let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Ping(Bytes::new()))).await;
                if r.is_err() || r.unwrap_or(Ok(())).is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}
