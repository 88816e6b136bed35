//! Push channel lifecycle.
//!
//! [`PushChannel`] abstracts the WebSocket transport; the
//! [`ConnectionManager`] layers the protocol lifecycle on top of it:
//! connect, join the conversation topic, track the subscription state, and
//! reconnect after a loss — but only while the app is foregrounded.

pub mod ws;

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use swiftdrop_proto::conversation::ConversationId;
use swiftdrop_proto::event::{ClientFrame, PushEvent};

/// Authentication material for the push channel.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Bearer token, same one the REST API uses.
    pub token: String,
    /// The authenticated user.
    pub user_id: String,
}

/// Lifecycle state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live transport.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Transport up, conversation topic not yet joined.
    Connected,
    /// Transport up and topic join confirmed by the server.
    Subscribed,
}

/// Errors from the push channel transport.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The connect attempt failed.
    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    /// The connect attempt did not complete in time.
    #[error("connect timed out")]
    Timeout,

    /// A frame was sent while the channel was down.
    #[error("not connected")]
    NotConnected,

    /// The transport rejected an outbound frame.
    #[error("failed to send frame: {0}")]
    SendFailed(String),
}

/// A bidirectional push channel to the support backend.
///
/// Implementations must be cheap to share (`&self` methods) and must
/// surface a server-initiated close as a `ConnectionLost` event from
/// [`next_event`](PushChannel::next_event) followed by `None`.
pub trait PushChannel: Send + Sync {
    /// Establishes the transport and completes the server handshake.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the transport cannot be established or
    /// the handshake times out.
    fn connect(
        &self,
        credentials: &Credentials,
    ) -> impl std::future::Future<Output = Result<(), ChannelError>> + Send;

    /// Sends a client frame.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotConnected`] when the channel is down, or
    /// [`ChannelError::SendFailed`] if the transport rejects the frame.
    fn send_frame(
        &self,
        frame: &ClientFrame,
    ) -> impl std::future::Future<Output = Result<(), ChannelError>> + Send;

    /// Waits for the next server event. `None` means the channel is closed
    /// and will produce no further events until reconnected.
    fn next_event(&self) -> impl std::future::Future<Output = Option<PushEvent>> + Send;

    /// Whether the transport is currently up.
    fn is_connected(&self) -> bool;

    /// Tears the transport down.
    fn close(&self) -> impl std::future::Future<Output = ()> + Send;
}

/// Owns the push channel lifecycle for one conversation.
pub struct ConnectionManager<C> {
    channel: C,
    credentials: Credentials,
    state: Mutex<ConnectionState>,
    /// The topic we want to be subscribed to, restored on reconnect.
    desired: Mutex<Option<ConversationId>>,
    foregrounded: AtomicBool,
}

impl<C: PushChannel> ConnectionManager<C> {
    /// Creates a manager over an unconnected channel.
    pub fn new(channel: C, credentials: Credentials) -> Self {
        Self {
            channel,
            credentials,
            state: Mutex::new(ConnectionState::Disconnected),
            desired: Mutex::new(None),
            foregrounded: AtomicBool::new(true),
        }
    }

    /// The underlying channel, for reading events.
    pub const fn channel(&self) -> &C {
        &self.channel
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether the transport is up (connected or subscribed).
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Subscribed
        ) && self.channel.is_connected()
    }

    /// Establishes the push channel. Idempotent: connecting while already
    /// connected (or while another connect is in flight) is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the transport cannot be established.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        {
            let mut state = self.state.lock();
            match *state {
                ConnectionState::Connected | ConnectionState::Subscribed
                    if self.channel.is_connected() =>
                {
                    return Ok(());
                }
                ConnectionState::Connecting => return Ok(()),
                _ => *state = ConnectionState::Connecting,
            }
        }

        match self.channel.connect(&self.credentials).await {
            Ok(()) => {
                *self.state.lock() = ConnectionState::Connected;
                tracing::info!("push channel connected");
                Ok(())
            }
            Err(err) => {
                *self.state.lock() = ConnectionState::Disconnected;
                tracing::warn!(error = %err, "push channel connect failed");
                Err(err)
            }
        }
    }

    /// Requests a topic join for `conversation`. The subscription is not
    /// live until the server's `joined` event arrives and the caller
    /// forwards it to [`confirm_subscribed`](Self::confirm_subscribed).
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotConnected`] if the channel is down.
    pub async fn join(&self, conversation: &ConversationId) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        *self.desired.lock() = Some(conversation.clone());
        self.channel
            .send_frame(&ClientFrame::Join {
                conversation_id: conversation.clone(),
            })
            .await
    }

    /// Records the server's join confirmation. A confirmation for a topic
    /// we no longer want is ignored.
    pub fn confirm_subscribed(&self, conversation: &ConversationId) {
        let desired = self.desired.lock();
        if desired.as_ref() == Some(conversation) {
            *self.state.lock() = ConnectionState::Subscribed;
            tracing::info!(conversation = %conversation, "subscribed");
        }
    }

    /// Records a connection loss observed by the caller.
    pub fn mark_lost(&self) {
        *self.state.lock() = ConnectionState::Disconnected;
        tracing::info!("push channel lost");
    }

    /// Records whether the app is foregrounded. Reconnects are suppressed
    /// in the background.
    pub fn set_foregrounded(&self, foregrounded: bool) {
        self.foregrounded.store(foregrounded, Ordering::SeqCst);
    }

    /// Whether the app is foregrounded.
    pub fn is_foregrounded(&self) -> bool {
        self.foregrounded.load(Ordering::SeqCst)
    }

    /// Reconnects and re-issues the topic join, if disconnected and
    /// foregrounded. Returns whether a reconnect was attempted.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the reconnect or rejoin fails.
    pub async fn try_reconnect(&self) -> Result<bool, ChannelError> {
        if !self.is_foregrounded() || self.is_connected() {
            return Ok(false);
        }
        self.connect().await?;
        let desired = self.desired.lock().clone();
        if let Some(conversation) = desired {
            self.join(&conversation).await?;
        }
        Ok(true)
    }

    /// Leaves the topic and closes the transport. Safe to call repeatedly.
    pub async fn teardown(&self) {
        let desired = self.desired.lock().take();
        if let Some(conversation) = desired {
            if self.is_connected() {
                // Best effort: the server drops the topic on close anyway.
                let _ = self
                    .channel
                    .send_frame(&ClientFrame::Leave {
                        conversation_id: conversation,
                    })
                    .await;
            }
        }
        self.channel.close().await;
        *self.state.lock() = ConnectionState::Disconnected;
    }
}
