//! Test doubles for the network seams.
//!
//! [`ScriptedApi`] answers REST calls from a prepared script and records
//! what was asked; [`FakeChannel`] is an in-process push channel driven by
//! a [`FakeChannelHandle`]. Both are used by the crate's own tests and are
//! public so downstream consumers can drive the session without a backend.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use swiftdrop_proto::conversation::ConversationId;
use swiftdrop_proto::event::{ClientFrame, PushEvent};
use swiftdrop_proto::history::{HistoryRequest, HistoryResponse, SendResponse};
use swiftdrop_proto::message::{MessageId, SendRequest, TempId};

use crate::api::{ApiError, SupportApi};
use crate::connection::{ChannelError, Credentials, PushChannel};

/// A [`SupportApi`] that replays scripted responses.
///
/// History responses must be scripted explicitly; sends default to an
/// acknowledgment without an echo when the script runs dry.
#[derive(Default)]
pub struct ScriptedApi {
    history_script: Mutex<VecDeque<Result<HistoryResponse, ApiError>>>,
    send_script: Mutex<VecDeque<Result<SendResponse, ApiError>>>,
    history_calls: Mutex<Vec<HistoryRequest>>,
    send_calls: Mutex<Vec<(TempId, SendRequest)>>,
    mark_read_calls: Mutex<Vec<MessageId>>,
}

impl ScriptedApi {
    /// Creates an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the next history response.
    pub fn script_history(&self, result: Result<HistoryResponse, ApiError>) {
        self.history_script.lock().push_back(result);
    }

    /// Queues the next send response.
    pub fn script_send(&self, result: Result<SendResponse, ApiError>) {
        self.send_script.lock().push_back(result);
    }

    /// Every history request made so far.
    #[must_use]
    pub fn history_calls(&self) -> Vec<HistoryRequest> {
        self.history_calls.lock().clone()
    }

    /// Every send made so far, with its provisional id.
    #[must_use]
    pub fn send_calls(&self) -> Vec<(TempId, SendRequest)> {
        self.send_calls.lock().clone()
    }

    /// Every mark-read call made so far.
    #[must_use]
    pub fn mark_read_calls(&self) -> Vec<MessageId> {
        self.mark_read_calls.lock().clone()
    }
}

impl SupportApi for ScriptedApi {
    async fn fetch_history(
        &self,
        _conversation: &ConversationId,
        request: &HistoryRequest,
    ) -> Result<HistoryResponse, ApiError> {
        self.history_calls.lock().push(request.clone());
        self.history_script
            .lock()
            .pop_front()
            .unwrap_or(Err(ApiError::Network("no scripted history response".into())))
    }

    async fn send_message(
        &self,
        _conversation: &ConversationId,
        temp_id: TempId,
        payload: &SendRequest,
    ) -> Result<SendResponse, ApiError> {
        self.send_calls.lock().push((temp_id, payload.clone()));
        self.send_script
            .lock()
            .pop_front()
            .unwrap_or(Ok(SendResponse { message: None }))
    }

    async fn mark_read(
        &self,
        _conversation: &ConversationId,
        message_id: &MessageId,
    ) -> Result<(), ApiError> {
        self.mark_read_calls.lock().push(message_id.clone());
        Ok(())
    }
}

struct FakeShared {
    connected: AtomicBool,
    fail_connect: AtomicBool,
    connects: AtomicUsize,
    frames: Mutex<Vec<ClientFrame>>,
}

/// An in-process [`PushChannel`] fed by a [`FakeChannelHandle`].
pub struct FakeChannel {
    shared: Arc<FakeShared>,
    events: AsyncMutex<mpsc::UnboundedReceiver<PushEvent>>,
}

/// Test-side controls for a [`FakeChannel`].
#[derive(Clone)]
pub struct FakeChannelHandle {
    shared: Arc<FakeShared>,
    events: mpsc::UnboundedSender<PushEvent>,
}

impl FakeChannel {
    /// Creates a channel and the handle that drives it.
    #[must_use]
    pub fn new() -> (Self, FakeChannelHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(FakeShared {
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            frames: Mutex::new(Vec::new()),
        });
        let channel = Self {
            shared: Arc::clone(&shared),
            events: AsyncMutex::new(rx),
        };
        let handle = FakeChannelHandle { shared, events: tx };
        (channel, handle)
    }
}

impl FakeChannelHandle {
    /// Delivers a server event to the channel's consumer.
    pub fn inject(&self, event: PushEvent) {
        let _ = self.events.send(event);
    }

    /// Every client frame sent so far.
    #[must_use]
    pub fn frames(&self) -> Vec<ClientFrame> {
        self.shared.frames.lock().clone()
    }

    /// Number of connect attempts made.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Makes subsequent connect attempts fail (or succeed again).
    pub fn set_fail_connect(&self, fail: bool) {
        self.shared.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Simulates a transport loss: the channel goes down and the consumer
    /// observes a `ConnectionLost` event.
    pub fn drop_connection(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        self.inject(PushEvent::ConnectionLost);
    }
}

impl PushChannel for FakeChannel {
    async fn connect(&self, _credentials: &Credentials) -> Result<(), ChannelError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail_connect.load(Ordering::SeqCst) {
            return Err(ChannelError::ConnectFailed("scripted failure".into()));
        }
        self.shared.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_frame(&self, frame: &ClientFrame) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        self.shared.frames.lock().push(frame.clone());
        Ok(())
    }

    async fn next_event(&self) -> Option<PushEvent> {
        self.events.lock().await.recv().await
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
    }
}
