//! Real-time channel — the fast path.
//!
//! Connecting announces the user's identity with a `user_connected` event;
//! until that lands the server refuses every other event. Incoming frames
//! are decoded on a background task and handed over on an in-process
//! channel, so slow consumers never stall the socket read loop.

use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use lavoro_shared::{ClientEvent, ServerEvent};

use crate::error::{ClientError, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// One live WebSocket connection bound to a user identity.
pub struct SocketClient {
    writer: WsSink,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    reader_task: JoinHandle<()>,
}

impl SocketClient {
    /// Connect to `ws_url` (e.g. `ws://host:3000/ws`) and bind the
    /// connection to `user_id`.
    pub async fn connect(ws_url: &str, user_id: &str) -> Result<Self> {
        let (stream, _) = connect_async(ws_url).await?;
        let (writer, mut reader) = stream.split();
        let (tx, events) = mpsc::unbounded_channel();

        let reader_task = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                if tx.send(event).is_err() {
                                    break;
                                }
                            }
                            Err(err) => debug!(%err, "dropping unrecognized frame"),
                        }
                    }
                    // Pong replies to server pings are handled by the
                    // protocol layer as long as we keep reading.
                    Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) | Ok(WsMessage::Binary(_)) => {}
                    Ok(WsMessage::Close(_)) | Ok(WsMessage::Frame(_)) => break,
                    Err(err) => {
                        debug!(%err, "socket read failed");
                        break;
                    }
                }
            }
        });

        let mut client = Self {
            writer,
            events,
            reader_task,
        };
        client
            .emit(&ClientEvent::UserConnected {
                user_id: user_id.to_string(),
            })
            .await?;
        Ok(client)
    }

    /// Send one event to the server.
    pub async fn emit(&mut self, event: &ClientEvent) -> Result<()> {
        let text = serde_json::to_string(event)?;
        self.writer.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    /// Wait for the next server event. Returns an error once the socket
    /// has closed.
    pub async fn next_event(&mut self) -> Result<ServerEvent> {
        self.events.recv().await.ok_or(ClientError::SocketClosed)
    }

    /// Drain one pending event without waiting, if any.
    pub fn try_next_event(&mut self) -> Option<ServerEvent> {
        self.events.try_recv().ok()
    }

    /// Close the connection and stop the reader task.
    pub async fn close(mut self) -> Result<()> {
        // A close error just means the peer beat us to it.
        let _ = self.writer.send(WsMessage::Close(None)).await;
        self.reader_task.abort();
        Ok(())
    }
}
