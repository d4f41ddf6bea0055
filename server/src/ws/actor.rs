use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::ConnectionSender;

/// Ping interval: server sends a WebSocket ping every 30 seconds to detect
/// abrupt disconnects that never produce a Close frame.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if no pong arrives within 10 seconds after a ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for a WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: processes incoming frames, dispatches to protocol handlers
///
/// The mpsc channel allows any part of the system to push events to this
/// client by cloning the sender.
///
/// The connection starts unbound. The first `user_connected` event binds it
/// to a user identity and registers it in the connection registry; until
/// then, chat events are rejected with an `error` event.
pub async fn run_connection(socket: WebSocket, state: AppState) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Bound lazily by the user_connected announce.
    let mut identity: Option<String> = None;

    tracing::debug!("WebSocket actor started");

    // Writer task: forwards mpsc messages to the WebSocket sink.
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Ping task: periodic pings, closes on missing pong.
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {
                    // Pong received, continue
                }
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket frames.
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_frame(&text, &tx, &state, &mut identity).await;
                }
                Message::Binary(_) => {
                    tracing::debug!(
                        user_id = identity.as_deref().unwrap_or("unbound"),
                        "Received binary frame (expected JSON text)"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::debug!(
                        user_id = identity.as_deref().unwrap_or("unbound"),
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = identity.as_deref().unwrap_or("unbound"),
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                // Stream ended — client disconnected
                break;
            }
        }
    }

    writer_handle.abort();
    ping_handle.abort();

    if let Some(user_id) = &identity {
        unregister_connection(&state, user_id, &tx);
        tracing::info!(user_id = %user_id, "WebSocket actor stopped");
    }
}

/// Writer task: receives messages from the mpsc channel and forwards them
/// to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}

/// Register a connection sender in the connection registry.
pub(super) fn register_connection(state: &AppState, user_id: &str, tx: ConnectionSender) {
    state
        .connections
        .entry(user_id.to_string())
        .or_default()
        .push(tx);

    let conn_count = state
        .connections
        .get(user_id)
        .map(|v| v.len())
        .unwrap_or(0);
    tracing::debug!(
        user_id = %user_id,
        connections = conn_count,
        "Connection registered"
    );
}

/// Remove this connection (and any other closed senders) from the registry.
pub(super) fn unregister_connection(state: &AppState, user_id: &str, tx: &ConnectionSender) {
    let mut remove_user = false;

    if let Some(mut connections) = state.connections.get_mut(user_id) {
        connections.retain(|sender| !sender.is_closed() && !sender.same_channel(tx));
        if connections.is_empty() {
            remove_user = true;
        }
    }

    if remove_user {
        state.connections.remove(user_id);
    }

    tracing::debug!(user_id = %user_id, "Connection unregistered");
}
