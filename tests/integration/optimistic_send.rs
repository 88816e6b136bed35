//! Integration tests for optimistic sending: the message appears
//! immediately as `Pending`, is confirmed in place by the push channel
//! echo, and duplicate echoes leave exactly one entry.

// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc
)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use swiftdrop_chat::cache::MemoryStore;
use swiftdrop_chat::clock::ManualClock;
use swiftdrop_chat::config::SyncConfig;
use swiftdrop_chat::connection::Credentials;
use swiftdrop_chat::session::{ConversationSession, SessionEvent};
use swiftdrop_chat::testing::{FakeChannel, FakeChannelHandle, ScriptedApi};

use swiftdrop_proto::conversation::{
    Conversation, ConversationId, PartyRef, TicketPriority, TicketStatus,
};
use swiftdrop_proto::event::{PushEvent, ServerMessage};
use swiftdrop_proto::history::{HistoryResponse, PageInfo};
use swiftdrop_proto::message::{
    MessageId, MessageKind, MessageOrigin, MessageStatus, TempId, Timestamp,
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
        priority: TicketPriority::High,
        category: "damaged_package".into(),
        customer: PartyRef {
            id: "u-1".into(),
            name: "Riley".into(),
        },
        agent: None,
        last_activity: Timestamp::from_millis(0),
    }
}

fn empty_history() -> HistoryResponse {
    HistoryResponse {
        conversation: ticket(),
        messages: Vec::new(),
        pagination: PageInfo { has_more: false },
    }
}

fn echo_for(temp: TempId, id: &str, created_at: u64) -> ServerMessage {
    ServerMessage {
        id: MessageId::new(id),
        temp_id: Some(temp),
        content: "on my way".into(),
        created_at: Timestamp::from_millis(created_at),
        display_timestamp: "10:24".into(),
        origin: MessageOrigin::Customer,
        kind: MessageKind::Text,
        status: MessageStatus::Sent,
    }
}

type TestSession = ConversationSession<ScriptedApi, FakeChannel, MemoryStore>;

async fn connected_session() -> (
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
    session.api().script_history(Ok(empty_history()));
    session.load().await.unwrap();
    // Drain the load events so tests start from a clean receiver.
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
async fn send_appears_immediately_as_pending() {
    let (session, _events, _handle) = connected_session().await;

    let temp = session.send_message("on my way".into()).await.unwrap();

    let messages = session.messages();
    assert_eq!(messages.len(), 1);
    let msg = &messages[0];
    assert_eq!(msg.temp_id, Some(temp));
    assert!(msg.id.is_none());
    assert_eq!(msg.status, MessageStatus::Pending);
    assert!(msg.optimistic);

    session.dispose().await;
}

#[tokio::test]
async fn push_echo_confirms_in_place() {
    let (session, mut events, handle) = connected_session().await;
    let temp = session.send_message("on my way".into()).await.unwrap();
    // Drain the send's own MessagesChanged so wait_for sees the echo's.
    while events.try_recv().is_ok() {}

    handle.inject(PushEvent::NewMessage(echo_for(temp, "m-77", 2_000)));
    wait_for(&mut events, &SessionEvent::MessagesChanged).await;

    let messages = session.messages();
    assert_eq!(messages.len(), 1, "confirmation must replace, not append");
    let msg = &messages[0];
    assert_eq!(msg.id, Some(MessageId::new("m-77")));
    assert_eq!(msg.status, MessageStatus::Sent);
    assert!(!msg.optimistic);
    assert!(msg.retry.is_none());

    session.dispose().await;
}

#[tokio::test]
async fn duplicate_echo_leaves_one_entry() {
    let (session, mut events, handle) = connected_session().await;
    let temp = session.send_message("on my way".into()).await.unwrap();

    let echo = echo_for(temp, "m-77", 2_000);
    handle.inject(PushEvent::NewMessage(echo.clone()));
    wait_for(&mut events, &SessionEvent::MessagesChanged).await;
    handle.inject(PushEvent::NewMessage(echo));
    // Give the event loop a moment to process the duplicate.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(session.messages().len(), 1);

    session.dispose().await;
}

#[tokio::test]
async fn direct_response_echo_also_confirms() {
    let (session, _events, _handle) = connected_session().await;

    // The backend acknowledges in the send response itself. The echo's
    // temp id cannot be known up front, so script it via a push-style
    // round trip: send, then verify the recorded temp id matches.
    let temp = session.send_message("on my way".into()).await.unwrap();
    let calls = session.api().send_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, temp);
    assert_eq!(calls[0].1.content, "on my way");

    session.dispose().await;
}

#[tokio::test]
async fn interleaved_remote_message_keeps_order() {
    let (session, mut events, handle) = connected_session().await;
    let temp = session.send_message("is anyone there?".into()).await.unwrap();

    // A remote message lands before the confirmation does.
    handle.inject(PushEvent::NewMessage(ServerMessage {
        id: MessageId::new("m-80"),
        temp_id: None,
        content: "checking now".into(),
        created_at: Timestamp::from_millis(5_000),
        display_timestamp: String::new(),
        origin: MessageOrigin::Agent,
        kind: MessageKind::Text,
        status: MessageStatus::Delivered,
    }));
    wait_for(&mut events, &SessionEvent::MessagesChanged).await;
    handle.inject(PushEvent::NewMessage(echo_for(temp, "m-79", 1_500)));
    wait_for(&mut events, &SessionEvent::MessagesChanged).await;

    let messages = session.messages();
    assert_eq!(messages.len(), 2);
    // The confirmed send keeps its position before the later remote message.
    assert_eq!(messages[0].id, Some(MessageId::new("m-79")));
    assert_eq!(messages[1].id, Some(MessageId::new("m-80")));

    session.dispose().await;
}
