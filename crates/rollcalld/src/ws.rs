use crate::hub::{Hub, Outbound};
use crate::protocol::{parse_command, Role, ServerMessage};
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Interval between heartbeat pings.
const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Identity of a viewer, supplied by the page that opens the socket.
#[derive(Debug, Deserialize)]
pub struct ViewerParams {
    pub name: Option<String>,
    #[serde(default)]
    pub role: Role,
}

pub fn router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(hub)
}

/// Frames older than this count as stale in the health report.
const FRESH_FRAME_AGE: Duration = Duration::from_secs(10);

async fn health(State(hub): State<Arc<Hub>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "cameras_running": hub.is_running(),
        "fresh_frames": hub.frames().has_fresh_frames(FRESH_FRAME_AGE),
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ViewerParams>,
    State(hub): State<Arc<Hub>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub, params))
}

/// Register the viewer, forward its queue to the socket, and dispatch
/// inbound commands until it disconnects.
async fn handle_socket(socket: WebSocket, hub: Arc<Hub>, params: ViewerParams) {
    let name = params
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("viewer-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));
    let (viewer, rx) = hub.connect(name, params.role).await;

    let (sink, mut stream) = socket.split();
    let mut send_task = tokio::spawn(forward_outbound(rx, sink, viewer.id.clone()));

    loop {
        let result = tokio::select! {
            incoming = stream.next() => match incoming {
                Some(result) => result,
                None => break,
            },
            // The hub dropped this viewer, or the socket stopped accepting writes.
            _ = &mut send_task => break,
        };
        match result {
            Ok(Message::Text(text)) => match parse_command(text.as_str()) {
                Ok(command) => hub.handle_command(&viewer, command).await,
                Err(e) => {
                    tracing::debug!(viewer = %viewer.id, error = %e, "malformed command");
                    hub.send_to(&viewer.id, ServerMessage::error(format!("invalid command: {e}")))
                        .await;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(viewer = %viewer.id, "pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(viewer = %viewer.id, error = %e, "viewer receive error");
                break;
            }
        }
    }

    hub.disconnect(&viewer.id).await;
    send_task.abort();
}

/// Write queued items to the socket. When the queue closes, because the hub
/// dropped the viewer, the socket is closed too.
async fn forward_outbound<S>(mut rx: mpsc::Receiver<Outbound>, mut sink: S, viewer_id: String)
where
    S: Sink<Message> + Unpin,
{
    while let Some(item) = rx.recv().await {
        let (msg, closing) = match item {
            Outbound::Text(text) => (Message::Text(text.into()), false),
            Outbound::Ping => (Message::Ping(Bytes::new()), false),
            Outbound::Close => (Message::Close(None), true),
        };
        if sink.send(msg).await.is_err() {
            tracing::debug!(viewer = %viewer_id, "viewer socket closed");
            return;
        }
        if closing {
            return;
        }
    }
    tracing::debug!(viewer = %viewer_id, "viewer queue closed; closing socket");
    let _ = sink.send(Message::Close(None)).await;
}

/// Ping every viewer periodically so dead connections are noticed.
pub fn start_heartbeat(hub: Arc<Hub>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let count = hub.viewer_count().await;
            tracing::debug!(count, "viewer heartbeat");
            hub.ping_all().await;
        }
    })
}
