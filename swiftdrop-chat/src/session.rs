//! The conversation session: one support ticket's sync engine.
//!
//! [`ConversationSession`] wires every collaborator together and drives
//! them from two background tasks: an event loop consuming the push
//! channel, and a retry ticker draining unconfirmed sends. The UI layer
//! observes the session through a channel of [`SessionEvent`]s and reads
//! the current message list on demand.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use swiftdrop_proto::conversation::{Conversation, ConversationId};
use swiftdrop_proto::event::{PushEvent, ServerMessage};
use swiftdrop_proto::history::{HistoryRequest, HistoryResponse};
use swiftdrop_proto::message::{
    Message, MessageKind, SendRequest, TempId, ValidationError,
};

use crate::api::{ApiError, SupportApi};
use crate::cache::{SnapshotCache, SnapshotStore};
use crate::clock::SharedClock;
use crate::config::SyncConfig;
use crate::connection::{
    ChannelError, ConnectionManager, ConnectionState, Credentials, PushChannel,
};
use crate::pagination::PaginationController;
use crate::presence::{PresenceCoordinator, RemotePresence};
use crate::reconciler::{Applied, Reconciler, ReconcilerEvent};
use crate::retry::RetryQueue;

/// How long the retry ticker sleeps when the queue is empty.
const RETRY_IDLE: Duration = Duration::from_secs(1);

/// Errors surfaced to the caller of session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The send payload failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The backend rejected or failed a request.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The push channel failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The session has been disposed.
    #[error("session disposed")]
    Disposed,
}

/// Notifications to the UI layer.
///
/// Coarse by design: the UI re-reads [`ConversationSession::messages`] on
/// `MessagesChanged` rather than diffing event payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The initial history is available.
    HistoryLoaded {
        /// Whether it came from the local cache (a refresh follows).
        from_cache: bool,
    },
    /// The message list changed in any way.
    MessagesChanged,
    /// An older page was merged in.
    OlderPageLoaded {
        /// Genuinely new messages added (duplicates excluded).
        added: usize,
    },
    /// Ticket metadata changed.
    ConversationUpdated,
    /// Remote presence changed.
    PresenceChanged,
    /// Remote typing state flipped.
    TypingChanged,
    /// A send exhausted its retries.
    SendFailed {
        /// The failed message's provisional id.
        temp_id: TempId,
    },
    /// A saved scroll position is valid and should be applied.
    ScrollRestored {
        /// Opaque offset owned by the UI layer.
        offset: f64,
    },
    /// Push channel connectivity changed.
    ConnectionChanged {
        /// Whether the channel is up and subscribed.
        connected: bool,
    },
}

/// Sync engine for a single open conversation screen.
pub struct ConversationSession<A, C, S> {
    conversation_id: ConversationId,
    config: SyncConfig,
    api: A,
    manager: ConnectionManager<C>,
    cache: SnapshotCache<S>,
    reconciler: Mutex<Reconciler>,
    queue: RetryQueue,
    pagination: PaginationController,
    presence: PresenceCoordinator,
    clock: SharedClock,
    events: mpsc::Sender<SessionEvent>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    read_debounce: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Set once the first topic join confirms; a later join is a re-join
    /// and triggers a missed-message refresh.
    subscribed_before: AtomicBool,
    disposed: AtomicBool,
}

impl<A, C, S> ConversationSession<A, C, S>
where
    A: SupportApi + 'static,
    C: PushChannel + 'static,
    S: SnapshotStore + 'static,
{
    /// Creates the session and spawns its background tasks. The returned
    /// receiver carries [`SessionEvent`]s until the session is disposed.
    ///
    /// Call [`load`](Self::load) next to populate the message list.
    pub fn start(
        conversation_id: ConversationId,
        api: A,
        channel: C,
        store: S,
        credentials: Credentials,
        config: SyncConfig,
        clock: SharedClock,
    ) -> (Arc<Self>, mpsc::Receiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer);
        let session = Arc::new(Self {
            conversation_id,
            api,
            manager: ConnectionManager::new(channel, credentials),
            cache: SnapshotCache::new(store, config.cache_ttl, Arc::clone(&clock)),
            reconciler: Mutex::new(Reconciler::new()),
            queue: RetryQueue::new(config.clone(), Arc::clone(&clock)),
            pagination: PaginationController::new(config.initial_page_size, config.page_size),
            presence: PresenceCoordinator::new(),
            clock,
            config,
            events: events_tx,
            tasks: Mutex::new(Vec::new()),
            read_debounce: Mutex::new(None),
            subscribed_before: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        });

        let event_loop = tokio::spawn({
            let session = Arc::clone(&session);
            async move {
                loop {
                    let Some(event) = session.manager.channel().next_event().await else {
                        break;
                    };
                    if session.disposed.load(Ordering::SeqCst) {
                        break;
                    }
                    session.handle_event(event).await;
                }
            }
        });

        let retry_ticker = tokio::spawn({
            let session = Arc::clone(&session);
            async move {
                loop {
                    if session.disposed.load(Ordering::SeqCst) {
                        break;
                    }
                    let wait = session
                        .queue
                        .next_due_in()
                        .unwrap_or(RETRY_IDLE)
                        .max(Duration::from_millis(50));
                    tokio::time::sleep(wait).await;
                    if session.disposed.load(Ordering::SeqCst) {
                        break;
                    }
                    if session.queue.is_connected() && !session.queue.is_empty() {
                        session.drain_retries().await;
                    }
                }
            }
        });

        session.tasks.lock().extend([event_loop, retry_ticker]);
        (session, events_rx)
    }

    // -- lifecycle ----------------------------------------------------------

    /// Populates the session at screen entry: serve the cached snapshot if
    /// fresh, connect and join the push topic, then load or refresh from
    /// the network.
    ///
    /// # Errors
    ///
    /// Returns an error only when nothing could be shown at all — a cache
    /// hit followed by a network failure is offline mode, not an error.
    pub async fn load(self: &Arc<Self>) -> Result<(), SessionError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(SessionError::Disposed);
        }

        let seeded = self.seed_from_cache();

        match self.manager.connect().await {
            Ok(()) => {
                if let Err(err) = self.manager.join(&self.conversation_id).await {
                    tracing::warn!(error = %err, "topic join failed, continuing degraded");
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "push channel unavailable, starting offline");
            }
        }
        self.queue.set_connected(self.manager.is_connected());

        if seeded {
            if let Err(err) = self.refresh().await {
                tracing::warn!(error = %err, "background refresh failed, serving cache");
            }
            return Ok(());
        }

        match self
            .pagination
            .load_initial(&self.api, &self.conversation_id)
            .await
        {
            Some(Ok(response)) => {
                self.apply_initial(response);
                self.schedule_mark_read();
                Ok(())
            }
            Some(Err(err)) => Err(err.into()),
            // Another load is already in flight.
            None => Ok(()),
        }
    }

    fn seed_from_cache(&self) -> bool {
        let Some(snapshot) = self.cache.load_fresh(&self.conversation_id) else {
            return false;
        };
        let newest = {
            let mut reconciler = self.reconciler.lock();
            reconciler.seed(
                snapshot.conversation,
                snapshot.messages,
                snapshot.has_more_older,
            );
            reconciler.newest_confirmed_id()
        };
        self.emit(SessionEvent::HistoryLoaded { from_cache: true });
        if let Some(scroll) = self
            .cache
            .restorable_scroll(&self.conversation_id, newest.as_ref())
        {
            self.emit(SessionEvent::ScrollRestored {
                offset: scroll.offset,
            });
        }
        true
    }

    fn apply_initial(&self, response: HistoryResponse) {
        let has_more = response.pagination.has_more;
        let messages: Vec<Message> = response
            .messages
            .into_iter()
            .map(ServerMessage::into_message)
            .collect();
        {
            let mut reconciler = self.reconciler.lock();
            reconciler.apply(ReconcilerEvent::StatusChange {
                conversation: response.conversation,
                notice: None,
            });
            reconciler.apply(ReconcilerEvent::HistoryPage {
                older: messages,
                has_more,
            });
        }
        self.persist_snapshot();
        self.emit(SessionEvent::HistoryLoaded { from_cache: false });
        self.emit(SessionEvent::MessagesChanged);
    }

    /// Fetches the newest page and merges it into the existing list —
    /// the catch-up path after a cache-seeded start or a reconnect.
    ///
    /// Goes straight to the backend rather than through the pagination
    /// controller: its single-flight guard exists to collapse scroll
    /// bursts, and an in-flight older-page fetch must not swallow a
    /// catch-up. The merge is idempotent, so concurrency is harmless.
    async fn refresh(&self) -> Result<(), ApiError> {
        let request = HistoryRequest {
            limit: self.config.initial_page_size,
            older_than: None,
        };
        let response = self
            .api
            .fetch_history(&self.conversation_id, &request)
            .await?;
        let changed = {
            let mut reconciler = self.reconciler.lock();
            reconciler.apply(ReconcilerEvent::StatusChange {
                conversation: response.conversation,
                notice: None,
            });
            let mut changed = false;
            for wire in response.messages {
                if let Some(temp) = wire.temp_id {
                    self.queue.remove(temp);
                }
                changed |= reconciler
                    .apply(ReconcilerEvent::Realtime(wire.into_message()))
                    .list_changed();
            }
            // A fresh newest page is authoritative about whether older
            // history remains, which a stale cached snapshot is not.
            reconciler.set_has_more_older(response.pagination.has_more);
            changed
        };
        self.persist_snapshot();
        if changed {
            self.emit(SessionEvent::MessagesChanged);
        }
        Ok(())
    }

    /// Tears the session down: background tasks stop, the push channel
    /// closes, and a final snapshot is persisted. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.persist_snapshot();
        if let Some(handle) = self.read_debounce.lock().take() {
            handle.abort();
        }
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
        }
        self.manager.teardown().await;
        tracing::info!(conversation = %self.conversation_id, "session disposed");
    }

    // -- sending ------------------------------------------------------------

    /// Sends a text message optimistically. The entry appears in the list
    /// immediately as `Pending`; confirmation or failure follows through
    /// [`SessionEvent`]s.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Validation`] for an empty or oversized
    /// payload. Network failures are not errors here — the send is queued
    /// and retried.
    pub async fn send_message(&self, content: String) -> Result<TempId, SessionError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(SessionError::Disposed);
        }
        let payload = SendRequest {
            content,
            message_type: MessageKind::Text,
        };
        payload.validate()?;

        let message = Message::optimistic(payload.clone(), self.clock.now());
        let temp = message.temp_id.unwrap_or(TempId::nil());
        self.reconciler
            .lock()
            .apply(ReconcilerEvent::OptimisticSend(message));
        self.emit(SessionEvent::MessagesChanged);

        if !self.manager.is_connected() {
            // No attempt was possible; the reconnect drain sends it first.
            self.queue.enqueue_unattempted(temp, payload);
            return Ok(temp);
        }

        match self
            .api
            .send_message(&self.conversation_id, temp, &payload)
            .await
        {
            Ok(response) => {
                if let Some(echo) = response.message {
                    let applied = self
                        .reconciler
                        .lock()
                        .apply(ReconcilerEvent::Realtime(echo.into_message()));
                    if applied.list_changed() {
                        self.emit(SessionEvent::MessagesChanged);
                    }
                }
                // Without a direct echo the push channel confirms it.
                Ok(temp)
            }
            Err(err) if err.is_transient() => {
                tracing::debug!(temp_id = %temp, error = %err, "send failed, queueing retry");
                self.queue.enqueue(temp, payload);
                Ok(temp)
            }
            Err(err) => {
                tracing::warn!(temp_id = %temp, error = %err, "send rejected");
                self.reconciler.lock().mark_failed(temp);
                self.emit(SessionEvent::SendFailed { temp_id: temp });
                self.emit(SessionEvent::MessagesChanged);
                Ok(temp)
            }
        }
    }

    /// Manually retries a failed send: status returns to `Pending`, the
    /// retry count resets, and an attempt is made immediately.
    ///
    /// Returns false when the message is unknown or not failed.
    pub async fn retry_failed(&self, temp: TempId) -> bool {
        let payload = self
            .reconciler
            .lock()
            .reset_for_retry(temp, self.clock.now());
        let Some(payload) = payload else {
            return false;
        };
        self.queue.requeue(temp, payload);
        self.emit(SessionEvent::MessagesChanged);
        if self.queue.is_connected() {
            self.drain_retries().await;
        }
        true
    }

    /// Runs one retry-queue drain pass and applies the outcome.
    pub async fn drain_retries(&self) {
        let report = self.queue.drain(&self.conversation_id, &self.api).await;
        if report.is_noop() {
            return;
        }
        let mut changed = false;
        {
            let mut reconciler = self.reconciler.lock();
            for (_temp, echo) in report.sent {
                if let Some(echo) = echo {
                    changed |= reconciler
                        .apply(ReconcilerEvent::Realtime(echo.into_message()))
                        .list_changed();
                }
            }
            for (temp, count, at) in report.retried {
                reconciler.record_attempt(temp, count, at);
            }
            for temp in &report.failed {
                changed |= reconciler.mark_failed(*temp);
            }
        }
        for temp in report.failed {
            self.emit(SessionEvent::SendFailed { temp_id: temp });
        }
        if changed {
            self.emit(SessionEvent::MessagesChanged);
        }
    }

    // -- pagination ---------------------------------------------------------

    /// Loads the next older page; call when the user scrolls near the top.
    /// Overlapping calls collapse to one request.
    pub async fn near_top(&self) {
        let (oldest, has_more) = {
            let reconciler = self.reconciler.lock();
            (reconciler.oldest_confirmed_id(), reconciler.has_more_older())
        };
        match self
            .pagination
            .fetch_older(&self.api, &self.conversation_id, oldest, has_more)
            .await
        {
            Some(Ok(response)) => {
                let has_more = response.pagination.has_more;
                let older: Vec<Message> = response
                    .messages
                    .into_iter()
                    .map(ServerMessage::into_message)
                    .collect();
                let applied = self
                    .reconciler
                    .lock()
                    .apply(ReconcilerEvent::HistoryPage { older, has_more });
                if let Applied::Prepended { added } = applied {
                    self.emit(SessionEvent::OlderPageLoaded { added });
                    if added > 0 {
                        self.emit(SessionEvent::MessagesChanged);
                    }
                }
            }
            Some(Err(err)) => {
                // The scroll position is untouched; the user can trigger
                // another attempt by scrolling again.
                tracing::warn!(error = %err, "older page fetch failed");
            }
            None => {}
        }
    }

    // -- app lifecycle ------------------------------------------------------

    /// Handles the app going to the background: persist the snapshot and
    /// the scroll position, and stop reconnecting.
    pub fn on_background(&self, scroll_offset: Option<f64>) {
        self.manager.set_foregrounded(false);
        let screen = self.presence.screen();
        self.presence.set_screen(screen.visible, false);
        self.persist_snapshot();
        if let Some(offset) = scroll_offset {
            if let Some(newest) = self.reconciler.lock().newest_confirmed_id() {
                self.cache.store_scroll(&self.conversation_id, offset, newest);
            }
        }
    }

    /// Handles the app returning to the foreground: restore the saved
    /// scroll position while its anchor is still the newest message, then
    /// reconnect (the join confirmation triggers the catch-up refresh and
    /// retry drain).
    pub async fn on_foreground(self: &Arc<Self>) {
        self.manager.set_foregrounded(true);
        let screen = self.presence.screen();
        self.presence.set_screen(screen.visible, true);
        // Anchor check runs against the list as backgrounded, before the
        // reconnect can merge anything newer.
        let newest = self.reconciler.lock().newest_confirmed_id();
        if let Some(scroll) = self
            .cache
            .restorable_scroll(&self.conversation_id, newest.as_ref())
        {
            self.emit(SessionEvent::ScrollRestored {
                offset: scroll.offset,
            });
        }
        if let Err(err) = self.manager.try_reconnect().await {
            tracing::warn!(error = %err, "foreground reconnect failed");
        }
        self.queue.set_connected(self.manager.is_connected());
        self.schedule_mark_read();
    }

    /// Records whether the conversation screen is on display. Read
    /// receipts are suppressed while it is not.
    pub fn on_visibility(self: &Arc<Self>, visible: bool) {
        let screen = self.presence.screen();
        self.presence.set_screen(visible, screen.foregrounded);
        if visible {
            self.schedule_mark_read();
        }
    }

    /// Reports local typing state to the remote party. Best effort.
    pub async fn send_typing(&self, is_typing: bool) {
        if !self.manager.is_connected() {
            return;
        }
        if let Err(err) = self
            .manager
            .channel()
            .send_frame(&swiftdrop_proto::event::ClientFrame::Typing { is_typing })
            .await
        {
            tracing::debug!(error = %err, "typing frame dropped");
        }
    }

    // -- push events --------------------------------------------------------

    /// Applies one push channel event. Public so tests can drive the
    /// session without the background event loop.
    pub async fn handle_event(self: &Arc<Self>, event: PushEvent) {
        match event {
            PushEvent::NewMessage(wire) => {
                if let Some(temp) = wire.temp_id {
                    self.queue.remove(temp);
                }
                let remote = {
                    let mut reconciler = self.reconciler.lock();
                    let message = wire.into_message();
                    let remote = message.is_remote();
                    let applied = reconciler.apply(ReconcilerEvent::Realtime(message));
                    applied.list_changed().then_some(remote)
                };
                if let Some(remote) = remote {
                    self.emit(SessionEvent::MessagesChanged);
                    if remote {
                        self.schedule_mark_read();
                    }
                }
            }
            PushEvent::MessageAcknowledged { message_id, status } => {
                let applied = self.reconciler.lock().apply(ReconcilerEvent::Ack {
                    id: message_id,
                    status,
                });
                if applied.list_changed() {
                    self.emit(SessionEvent::MessagesChanged);
                }
            }
            PushEvent::ConversationRead {
                conversation_id,
                up_to,
            } => {
                if conversation_id != self.conversation_id {
                    return;
                }
                let applied = self
                    .reconciler
                    .lock()
                    .apply(ReconcilerEvent::ReadReceipt { up_to });
                if applied.list_changed() {
                    self.emit(SessionEvent::MessagesChanged);
                }
            }
            PushEvent::TypingIndicator(indicator) => {
                if self.presence.observe_typing(&indicator) {
                    self.emit(SessionEvent::TypingChanged);
                }
            }
            PushEvent::TicketStatusChanged {
                conversation,
                notice,
            } => {
                let applied = self.reconciler.lock().apply(ReconcilerEvent::StatusChange {
                    conversation,
                    notice: notice.map(ServerMessage::into_message),
                });
                self.emit(SessionEvent::ConversationUpdated);
                if applied.list_changed() {
                    self.emit(SessionEvent::MessagesChanged);
                }
            }
            PushEvent::UserPresenceChanged(update) => {
                let mut changed = self.presence.observe_presence(&update);
                if update.status != swiftdrop_proto::presence::PresenceStatus::Online {
                    changed |= self.presence.clear_typing();
                }
                if changed {
                    self.emit(SessionEvent::PresenceChanged);
                }
            }
            PushEvent::Joined { conversation_id } => {
                self.manager.confirm_subscribed(&conversation_id);
                if conversation_id != self.conversation_id {
                    return;
                }
                self.queue.set_connected(true);
                self.emit(SessionEvent::ConnectionChanged { connected: true });
                let rejoin = self.subscribed_before.swap(true, Ordering::SeqCst);
                self.drain_retries().await;
                if rejoin {
                    // Catch up on anything missed while disconnected.
                    if let Err(err) = self.refresh().await {
                        tracing::warn!(error = %err, "post-reconnect refresh failed");
                    }
                }
            }
            PushEvent::ConnectionLost => {
                self.manager.mark_lost();
                self.queue.set_connected(false);
                self.emit(SessionEvent::ConnectionChanged { connected: false });
            }
            PushEvent::ConnectionEstablished => {
                // Handshake-level frame, already consumed by the transport.
            }
            PushEvent::Error { reason } => {
                tracing::warn!(reason = %reason, "push channel error frame");
            }
        }
    }

    // -- read receipts ------------------------------------------------------

    /// Schedules a debounced read receipt for the newest remote message,
    /// if the screen is active and one is due. Re-scheduling restarts the
    /// debounce window, so a burst of arrivals collapses into one receipt.
    pub fn schedule_mark_read(self: &Arc<Self>) {
        let candidate = {
            let newest = self.reconciler.lock().newest_remote_id();
            self.presence.candidate(newest.as_ref())
        };
        if candidate.is_none() {
            return;
        }
        let mut slot = self.read_debounce.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        let session = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(session.config.read_receipt_debounce).await;
            session.flush_mark_read().await;
        }));
    }

    /// Sends the pending read receipt now, if one is still due.
    pub async fn flush_mark_read(&self) {
        let target = {
            let newest = self.reconciler.lock().newest_remote_id();
            self.presence.candidate(newest.as_ref())
        };
        let Some(target) = target else { return };
        match self.api.mark_read(&self.conversation_id, &target).await {
            Ok(()) => self.presence.record_marked(target),
            // Not recorded: the next trigger re-sends it.
            Err(err) => tracing::warn!(error = %err, "mark-read failed"),
        }
    }

    // -- accessors ----------------------------------------------------------

    /// The backend client, mainly so tests can reach a scripted double.
    #[must_use]
    pub const fn api(&self) -> &A {
        &self.api
    }

    /// The rendered message list, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.reconciler.lock().messages().to_vec()
    }

    /// Current ticket metadata, if loaded.
    #[must_use]
    pub fn conversation(&self) -> Option<Conversation> {
        self.reconciler.lock().conversation().cloned()
    }

    /// Whether older history exists beyond the loaded window.
    #[must_use]
    pub fn has_more_older(&self) -> bool {
        self.reconciler.lock().has_more_older()
    }

    /// Push channel lifecycle state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Last known remote presence and typing state.
    #[must_use]
    pub fn remote_presence(&self) -> RemotePresence {
        self.presence.remote()
    }

    /// Whether a send is still awaiting confirmation or retry.
    #[must_use]
    pub fn is_send_pending(&self, temp: TempId) -> bool {
        self.queue.contains(temp)
    }

    fn persist_snapshot(&self) {
        let (meta, messages, has_more) = {
            let reconciler = self.reconciler.lock();
            let Some(meta) = reconciler.conversation().cloned() else {
                return;
            };
            (
                meta,
                reconciler.tail(self.config.initial_page_size as usize),
                reconciler.has_more_older(),
            )
        };
        self.cache
            .store_snapshot(&self.conversation_id, meta, messages, has_more);
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.try_send(event).is_err() {
            tracing::debug!("session event dropped");
        }
    }
}
