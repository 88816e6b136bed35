//! Integration tests for connection loss and recovery: sends made while
//! offline are queued, and a reconnect both drains the queue and fetches
//! the messages missed while disconnected.

// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};

use swiftdrop_chat::api::{ApiError, SupportApi};
use swiftdrop_chat::cache::MemoryStore;
use swiftdrop_chat::clock::ManualClock;
use swiftdrop_chat::config::SyncConfig;
use swiftdrop_chat::connection::{ConnectionState, Credentials};
use swiftdrop_chat::session::{ConversationSession, SessionEvent};
use swiftdrop_chat::testing::{FakeChannel, FakeChannelHandle, ScriptedApi};

use swiftdrop_proto::conversation::{
    Conversation, ConversationId, PartyRef, TicketPriority, TicketStatus,
};
use swiftdrop_proto::event::{ClientFrame, PushEvent, ServerMessage};
use swiftdrop_proto::history::{HistoryRequest, HistoryResponse, PageInfo, SendResponse};
use swiftdrop_proto::message::{
    MessageId, MessageKind, MessageOrigin, MessageStatus, SendRequest, TempId, Timestamp,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn conv_id() -> ConversationId {
    ConversationId::new("ticket-1")
}

fn ticket() -> Conversation {
    Conversation {
        id: conv_id(),
        status: TicketStatus::Assigned,
        priority: TicketPriority::Normal,
        category: "delivery_delay".into(),
        customer: PartyRef {
            id: "u-1".into(),
            name: "Riley".into(),
        },
        agent: None,
        last_activity: Timestamp::from_millis(0),
    }
}

fn history(messages: Vec<ServerMessage>) -> HistoryResponse {
    HistoryResponse {
        conversation: ticket(),
        messages,
        pagination: PageInfo { has_more: false },
    }
}

fn agent_message(id: &str, created_at: u64) -> ServerMessage {
    ServerMessage {
        id: MessageId::new(id),
        temp_id: None,
        content: format!("msg {id}"),
        created_at: Timestamp::from_millis(created_at),
        display_timestamp: String::new(),
        origin: MessageOrigin::Agent,
        kind: MessageKind::Text,
        status: MessageStatus::Delivered,
    }
}

type TestSession = ConversationSession<ScriptedApi, FakeChannel, MemoryStore>;

async fn subscribed_session() -> (
    Arc<TestSession>,
    mpsc::Receiver<SessionEvent>,
    FakeChannelHandle,
) {
    let clock = ManualClock::new(Timestamp::from_millis(1_000));
    let (channel, handle) = FakeChannel::new();
    let (session, mut events) = ConversationSession::start(
        conv_id(),
        ScriptedApi::new(),
        channel,
        MemoryStore::new(),
        Credentials {
            token: "tok".into(),
            user_id: "u-1".into(),
        },
        SyncConfig::default(),
        Arc::new(clock),
    );
    session.api().script_history(Ok(history(Vec::new())));
    session.load().await.unwrap();
    handle.inject(PushEvent::Joined {
        conversation_id: conv_id(),
    });
    wait_for(&mut events, &SessionEvent::ConnectionChanged { connected: true }).await;
    assert_eq!(session.connection_state(), ConnectionState::Subscribed);
    while events.try_recv().is_ok() {}
    (session, events, handle)
}

async fn wait_for(events: &mut mpsc::Receiver<SessionEvent>, wanted: &SessionEvent) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if &event == wanted {
                return;
            }
        }
    })
    .await
    .expect("timed out waiting for session event");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connection_loss_is_observed() {
    let (session, mut events, handle) = subscribed_session().await;

    handle.drop_connection();
    wait_for(
        &mut events,
        &SessionEvent::ConnectionChanged { connected: false },
    )
    .await;
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);

    session.dispose().await;
}

#[tokio::test]
async fn sends_while_disconnected_are_queued_not_attempted() {
    let (session, mut events, handle) = subscribed_session().await;
    handle.drop_connection();
    wait_for(
        &mut events,
        &SessionEvent::ConnectionChanged { connected: false },
    )
    .await;

    let temp = session.send_message("are you there?".into()).await.unwrap();
    assert!(session.is_send_pending(temp));
    assert!(session.api().send_calls().is_empty());
    assert_eq!(session.messages()[0].status, MessageStatus::Pending);

    session.dispose().await;
}

#[tokio::test]
async fn reconnect_drains_the_queue_and_fetches_missed_messages() {
    let (session, mut events, handle) = subscribed_session().await;
    handle.drop_connection();
    wait_for(
        &mut events,
        &SessionEvent::ConnectionChanged { connected: false },
    )
    .await;

    let temp = session.send_message("are you there?".into()).await.unwrap();

    // While disconnected, the agent replied; the rejoin refresh finds it.
    session
        .api()
        .script_history(Ok(history(vec![agent_message("m-50", 9_000)])));

    session.on_foreground().await;
    handle.inject(PushEvent::Joined {
        conversation_id: conv_id(),
    });
    wait_for(&mut events, &SessionEvent::ConnectionChanged { connected: true }).await;

    // The queued send was attempted on the drain.
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.is_send_pending(temp) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queued send was not drained");
    assert_eq!(session.api().send_calls().len(), 1);

    // The missed message was merged in.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if session
                .messages()
                .iter()
                .any(|m| m.id == Some(MessageId::new("m-50")))
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("missed message never arrived");

    session.dispose().await;
}

#[tokio::test]
async fn rejoin_sends_a_fresh_join_frame() {
    let (session, mut events, handle) = subscribed_session().await;
    let joins_before = handle
        .frames()
        .iter()
        .filter(|f| matches!(f, ClientFrame::Join { .. }))
        .count();

    handle.drop_connection();
    wait_for(
        &mut events,
        &SessionEvent::ConnectionChanged { connected: false },
    )
    .await;
    session.api().script_history(Ok(history(Vec::new())));
    session.on_foreground().await;

    let joins_after = handle
        .frames()
        .iter()
        .filter(|f| matches!(f, ClientFrame::Join { .. }))
        .count();
    assert_eq!(joins_after, joins_before + 1);

    session.dispose().await;
}

/// A [`ScriptedApi`] wrapper that parks older-page fetches until released,
/// leaving newest-page fetches untouched.
struct SlowOlderPagesApi {
    inner: ScriptedApi,
    release: Arc<Notify>,
    older_started: Arc<AtomicBool>,
}

impl SlowOlderPagesApi {
    fn new() -> Self {
        Self {
            inner: ScriptedApi::new(),
            release: Arc::new(Notify::new()),
            older_started: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl SupportApi for SlowOlderPagesApi {
    async fn fetch_history(
        &self,
        conversation: &ConversationId,
        request: &HistoryRequest,
    ) -> Result<HistoryResponse, ApiError> {
        if request.older_than.is_some() {
            self.older_started.store(true, Ordering::SeqCst);
            self.release.notified().await;
        }
        self.inner.fetch_history(conversation, request).await
    }

    async fn send_message(
        &self,
        conversation: &ConversationId,
        temp_id: TempId,
        payload: &SendRequest,
    ) -> Result<SendResponse, ApiError> {
        self.inner.send_message(conversation, temp_id, payload).await
    }

    async fn mark_read(
        &self,
        conversation: &ConversationId,
        message_id: &MessageId,
    ) -> Result<(), ApiError> {
        self.inner.mark_read(conversation, message_id).await
    }
}

#[tokio::test]
async fn rejoin_catch_up_runs_while_an_older_page_fetch_is_in_flight() {
    let clock = ManualClock::new(Timestamp::from_millis(1_000));
    let (channel, handle) = FakeChannel::new();
    let (session, mut events) = ConversationSession::start(
        conv_id(),
        SlowOlderPagesApi::new(),
        channel,
        MemoryStore::new(),
        Credentials {
            token: "tok".into(),
            user_id: "u-1".into(),
        },
        SyncConfig::default(),
        Arc::new(clock),
    );
    session.api().inner.script_history(Ok(HistoryResponse {
        conversation: ticket(),
        messages: vec![agent_message("m-1", 10_000)],
        pagination: PageInfo { has_more: true },
    }));
    session.load().await.unwrap();
    handle.inject(PushEvent::Joined {
        conversation_id: conv_id(),
    });
    wait_for(&mut events, &SessionEvent::ConnectionChanged { connected: true }).await;

    // A scroll-driven older-page fetch starts and stalls on the backend.
    let scroll = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.near_top().await }
    });
    let older_started = Arc::clone(&session.api().older_started);
    tokio::time::timeout(Duration::from_secs(5), async {
        while !older_started.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("older page fetch never started");

    // The connection flaps while the older fetch is still hanging; the
    // rejoin must still catch up on the reply missed meanwhile.
    session.api().inner.script_history(Ok(history(vec![
        agent_message("m-1", 10_000),
        agent_message("m-2", 10_200),
    ])));
    handle.drop_connection();
    wait_for(
        &mut events,
        &SessionEvent::ConnectionChanged { connected: false },
    )
    .await;
    handle.inject(PushEvent::Joined {
        conversation_id: conv_id(),
    });
    wait_for(&mut events, &SessionEvent::ConnectionChanged { connected: true }).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if session
                .messages()
                .iter()
                .any(|m| m.id == Some(MessageId::new("m-2")))
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("rejoin catch-up was starved by the in-flight older fetch");
    assert!(
        older_started.load(Ordering::SeqCst),
        "the older fetch was still outstanding during the catch-up"
    );

    session.api().release.notify_one();
    scroll.await.unwrap();
    session.dispose().await;
}

#[tokio::test]
async fn backgrounded_app_does_not_reconnect() {
    let (session, mut events, handle) = subscribed_session().await;
    session.on_background(None);
    let connects_before = handle.connects();

    handle.drop_connection();
    wait_for(
        &mut events,
        &SessionEvent::ConnectionChanged { connected: false },
    )
    .await;

    // Foregrounding is what triggers the reconnect, nothing else does.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.connects(), connects_before);
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);

    session.dispose().await;
}
