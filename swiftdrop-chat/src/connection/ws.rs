//! WebSocket implementation of [`PushChannel`].
//!
//! Frames are JSON text payloads encoded by `swiftdrop_proto::codec`. A
//! background reader task decodes server frames into [`PushEvent`]s and
//! feeds them to a channel that outlives reconnects, so the session's
//! event loop never has to be re-wired. Malformed frames are logged and
//! skipped — the reader does not disconnect on bad data.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use swiftdrop_proto::codec;
use swiftdrop_proto::event::{ClientFrame, PushEvent};

use super::{ChannelError, Credentials, PushChannel};

/// Write half of the WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Read half of the WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Timeout for establishing the WebSocket connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the server's `connection_established` handshake frame.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffer for events decoded by the reader task.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// WebSocket push channel.
///
/// Created unconnected; [`connect`](PushChannel::connect) can be called
/// again after a loss, and the event stream handed out by
/// [`next_event`](PushChannel::next_event) carries across reconnects.
pub struct WsChannel {
    url: Url,
    events_tx: mpsc::Sender<PushEvent>,
    events_rx: AsyncMutex<mpsc::Receiver<PushEvent>>,
    sender: AsyncMutex<Option<WsSender>>,
    connected: Arc<AtomicBool>,
    reader_handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WsChannel {
    /// Creates an unconnected channel for the given push endpoint
    /// (`ws://` or `wss://`).
    #[must_use]
    pub fn new(url: Url) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            url,
            events_tx: tx,
            events_rx: AsyncMutex::new(rx),
            sender: AsyncMutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            reader_handle: parking_lot::Mutex::new(None),
        }
    }

    fn connect_url(&self, credentials: &Credentials) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("token", &credentials.token)
            .append_pair("user_id", &credentials.user_id);
        url
    }
}

impl PushChannel for WsChannel {
    /// Establishes the WebSocket connection and waits for the server's
    /// `connection_established` frame before returning.
    async fn connect(&self, credentials: &Credentials) -> Result<(), ChannelError> {
        let url = self.connect_url(credentials);
        let (ws_stream, _response) =
            tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
                .await
                .map_err(|_| {
                    tracing::warn!(url = %self.url, "push channel connect timed out");
                    ChannelError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = %self.url, error = %e, "push channel connect failed");
                    ChannelError::ConnectFailed(e.to_string())
                })?;

        let (ws_sender, mut ws_reader) = ws_stream.split();

        // The server's first frame must be connection_established.
        let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, ws_reader.next())
            .await
            .map_err(|_| {
                tracing::warn!(url = %self.url, "push channel handshake timed out");
                ChannelError::Timeout
            })?;
        match handshake {
            Some(Ok(Message::Text(payload))) => match codec::decode(payload.as_str()) {
                Ok(PushEvent::ConnectionEstablished) => {
                    tracing::info!(url = %self.url, "push channel established");
                }
                Ok(PushEvent::Error { reason }) => {
                    return Err(ChannelError::ConnectFailed(reason));
                }
                Ok(other) => {
                    tracing::warn!(?other, "unexpected handshake frame");
                    return Err(ChannelError::ConnectFailed(
                        "unexpected handshake frame".into(),
                    ));
                }
                Err(e) => {
                    return Err(ChannelError::ConnectFailed(format!(
                        "malformed handshake frame: {e}"
                    )));
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                return Err(ChannelError::ConnectFailed(
                    "server closed connection during handshake".into(),
                ));
            }
            Some(Ok(_)) => {
                return Err(ChannelError::ConnectFailed(
                    "unexpected non-text handshake frame".into(),
                ));
            }
            Some(Err(e)) => {
                return Err(ChannelError::ConnectFailed(e.to_string()));
            }
        }

        // Replace the previous reader, if any.
        if let Some(old) = self.reader_handle.lock().take() {
            old.abort();
        }

        self.connected.store(true, Ordering::SeqCst);
        *self.sender.lock().await = Some(ws_sender);

        let tx = self.events_tx.clone();
        let connected = Arc::clone(&self.connected);
        let handle = tokio::spawn(reader_loop(ws_reader, tx, connected));
        *self.reader_handle.lock() = Some(handle);

        Ok(())
    }

    async fn send_frame(&self, frame: &ClientFrame) -> Result<(), ChannelError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ChannelError::NotConnected);
        }
        let payload =
            codec::encode_client(frame).map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        let mut sender = self.sender.lock().await;
        let Some(ws_sender) = sender.as_mut() else {
            return Err(ChannelError::NotConnected);
        };
        ws_sender
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "push channel send failed");
                self.connected.store(false, Ordering::SeqCst);
                ChannelError::SendFailed(e.to_string())
            })
    }

    async fn next_event(&self) -> Option<PushEvent> {
        self.events_rx.lock().await.recv().await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader_handle.lock().take() {
            handle.abort();
        }
        if let Some(mut ws_sender) = self.sender.lock().await.take() {
            let _ = ws_sender.close().await;
        }
    }
}

/// Background task decoding server frames into [`PushEvent`]s.
///
/// Exits when the socket closes or errors, after synthesizing a
/// `ConnectionLost` event so the consumer observes the loss even when the
/// server never announced it.
async fn reader_loop(
    mut ws_reader: WsReader,
    tx: mpsc::Sender<PushEvent>,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Text(payload)) => match codec::decode(payload.as_str()) {
                Ok(PushEvent::ConnectionLost) => {
                    tracing::info!("server announced connection loss");
                    let _ = tx.send(PushEvent::ConnectionLost).await;
                    connected.store(false, Ordering::SeqCst);
                    return;
                }
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        // Consumer dropped; the channel is being torn down.
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed push frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("push channel closed by server");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(error = %e, "push channel read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
    let _ = tx.send(PushEvent::ConnectionLost).await;
}
