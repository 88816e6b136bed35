//! Integration tests for cold-start behavior: a fresh cached snapshot is
//! rendered immediately and refreshed in the background, an expired one is
//! discarded in favor of a full reload, and a cache hit keeps the screen
//! usable when the network is down.

// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::float_cmp
)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use swiftdrop_chat::api::ApiError;
use swiftdrop_chat::cache::{CachedSnapshot, MemoryStore, SnapshotStore};
use swiftdrop_chat::clock::ManualClock;
use swiftdrop_chat::config::SyncConfig;
use swiftdrop_chat::connection::Credentials;
use swiftdrop_chat::session::{ConversationSession, SessionError, SessionEvent};
use swiftdrop_chat::testing::{FakeChannel, FakeChannelHandle, ScriptedApi};

use swiftdrop_proto::conversation::{
    Conversation, ConversationId, PartyRef, TicketPriority, TicketStatus,
};
use swiftdrop_proto::event::ServerMessage;
use swiftdrop_proto::history::{HistoryResponse, PageInfo};
use swiftdrop_proto::message::{
    Message, MessageId, MessageKind, MessageOrigin, MessageStatus, Timestamp,
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
        agent: Some(PartyRef {
            id: "a-9".into(),
            name: "Sam".into(),
        }),
        last_activity: Timestamp::from_millis(1_000),
    }
}

fn cached_message(id: &str, created_at: u64) -> Message {
    Message {
        id: Some(MessageId::new(id)),
        temp_id: None,
        content: format!("msg {id}"),
        created_at: Timestamp::from_millis(created_at),
        display_timestamp: String::new(),
        origin: MessageOrigin::Agent,
        kind: MessageKind::Text,
        status: MessageStatus::Delivered,
        optimistic: false,
        retry: None,
    }
}

fn wire_message(id: &str, created_at: u64) -> ServerMessage {
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

fn history(messages: Vec<ServerMessage>, has_more: bool) -> HistoryResponse {
    HistoryResponse {
        conversation: ticket(),
        messages,
        pagination: PageInfo { has_more },
    }
}

type TestSession = ConversationSession<ScriptedApi, FakeChannel, MemoryStore>;

fn start_with_store(
    store: MemoryStore,
    clock: &ManualClock,
) -> (
    Arc<TestSession>,
    mpsc::Receiver<SessionEvent>,
    FakeChannelHandle,
) {
    let (channel, handle) = FakeChannel::new();
    let (session, events) = ConversationSession::start(
        conv_id(),
        ScriptedApi::new(),
        channel,
        store,
        Credentials {
            token: "tok".into(),
            user_id: "u-1".into(),
        },
        SyncConfig::default(),
        Arc::new(clock.clone()),
    );
    (session, events, handle)
}

async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

fn store_with_snapshot(cached_at: u64, messages: Vec<Message>) -> MemoryStore {
    let store = MemoryStore::new();
    store
        .save_snapshot(
            &conv_id(),
            &CachedSnapshot {
                conversation: ticket(),
                messages,
                has_more_older: true,
                cached_at: Timestamp::from_millis(cached_at),
            },
        )
        .unwrap();
    store
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fresh_snapshot_is_served_before_the_network_answers() {
    let clock = ManualClock::new(Timestamp::from_millis(100_000));
    // Snapshot is one minute old: well inside the 5 minute TTL.
    let store = store_with_snapshot(40_000, vec![cached_message("m-1", 10_000)]);
    let (session, mut events, _handle) = start_with_store(store, &clock);
    // The refresh gets one extra message the cache does not have.
    session.api().script_history(Ok(history(
        vec![wire_message("m-1", 10_000), wire_message("m-2", 20_000)],
        true,
    )));

    session.load().await.unwrap();

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::HistoryLoaded { from_cache: true }
    );
    // Refresh merged the missed message without duplicating the cached one.
    let messages = session.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].id, Some(MessageId::new("m-1")));
    assert_eq!(messages[1].id, Some(MessageId::new("m-2")));

    session.dispose().await;
}

#[tokio::test]
async fn refresh_overrides_the_cached_older_history_flag() {
    let clock = ManualClock::new(Timestamp::from_millis(100_000));
    // The snapshot claims older history exists beyond its window.
    let store = store_with_snapshot(40_000, vec![cached_message("m-1", 10_000)]);
    let (session, mut events, _handle) = start_with_store(store, &clock);
    // The fresh newest page says there is nothing older after all.
    session
        .api()
        .script_history(Ok(history(vec![wire_message("m-1", 10_000)], false)));

    session.load().await.unwrap();

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::HistoryLoaded { from_cache: true }
    );
    assert!(!session.has_more_older());
    // Scrolling up therefore asks the backend nothing.
    session.near_top().await;
    assert_eq!(session.api().history_calls().len(), 1);

    session.dispose().await;
}

#[tokio::test]
async fn expired_snapshot_forces_a_full_reload() {
    let clock = ManualClock::new(Timestamp::from_millis(0));
    let store = store_with_snapshot(0, vec![cached_message("m-1", 10)]);
    // Six minutes later the snapshot is past its 5 minute TTL.
    clock.advance(Duration::from_secs(6 * 60));

    let (session, mut events, _handle) = start_with_store(store, &clock);
    session
        .api()
        .script_history(Ok(history(vec![wire_message("m-9", 50_000)], false)));

    session.load().await.unwrap();

    // No cached paint: the first history event is the network one.
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::HistoryLoaded { from_cache: false }
    );
    let messages = session.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, Some(MessageId::new("m-9")));

    session.dispose().await;
}

#[tokio::test]
async fn cache_hit_with_network_down_is_offline_mode_not_an_error() {
    let clock = ManualClock::new(Timestamp::from_millis(100_000));
    let store = store_with_snapshot(90_000, vec![cached_message("m-1", 10_000)]);
    let (session, mut events, handle) = start_with_store(store, &clock);
    handle.set_fail_connect(true);
    session
        .api()
        .script_history(Err(ApiError::Network("dns failure".into())));

    // The cached conversation still renders.
    session.load().await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::HistoryLoaded { from_cache: true }
    );
    assert_eq!(session.messages().len(), 1);

    session.dispose().await;
}

#[tokio::test]
async fn cache_miss_with_network_down_is_an_error() {
    let clock = ManualClock::new(Timestamp::from_millis(100_000));
    let (session, _events, handle) = start_with_store(MemoryStore::new(), &clock);
    handle.set_fail_connect(true);
    session.api().script_history(Err(ApiError::Timeout));

    let result = session.load().await;
    assert!(matches!(
        result,
        Err(SessionError::Api(ApiError::Timeout))
    ));

    session.dispose().await;
}

#[tokio::test]
async fn missing_conversation_surfaces_not_found() {
    let clock = ManualClock::new(Timestamp::from_millis(100_000));
    let (session, _events, _handle) = start_with_store(MemoryStore::new(), &clock);
    session.api().script_history(Err(ApiError::NotFound));

    let result = session.load().await;
    assert!(matches!(result, Err(SessionError::Api(ApiError::NotFound))));

    session.dispose().await;
}
