//! Integration tests for the send retry path: the 5s/15s/30s backoff
//! schedule, permanent failure after the retry bound, and manual retry
//! resetting the count.

// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc
)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use swiftdrop_chat::api::ApiError;
use swiftdrop_chat::cache::MemoryStore;
use swiftdrop_chat::clock::ManualClock;
use swiftdrop_chat::config::SyncConfig;
use swiftdrop_chat::connection::Credentials;
use swiftdrop_chat::session::{ConversationSession, SessionEvent};
use swiftdrop_chat::testing::{FakeChannel, FakeChannelHandle, ScriptedApi};

use swiftdrop_proto::conversation::{
    Conversation, ConversationId, PartyRef, TicketPriority, TicketStatus,
};
use swiftdrop_proto::history::{HistoryResponse, PageInfo};
use swiftdrop_proto::message::{MessageStatus, Timestamp};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn conv_id() -> ConversationId {
    ConversationId::new("ticket-1")
}

fn empty_history() -> HistoryResponse {
    HistoryResponse {
        conversation: Conversation {
            id: conv_id(),
            status: TicketStatus::Open,
            priority: TicketPriority::Normal,
            category: "delivery_delay".into(),
            customer: PartyRef {
                id: "u-1".into(),
                name: "Riley".into(),
            },
            agent: None,
            last_activity: Timestamp::from_millis(0),
        },
        messages: Vec::new(),
        pagination: PageInfo { has_more: false },
    }
}

type TestSession = ConversationSession<ScriptedApi, FakeChannel, MemoryStore>;

async fn connected_session() -> (
    Arc<TestSession>,
    mpsc::Receiver<SessionEvent>,
    FakeChannelHandle,
    ManualClock,
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
        Arc::new(clock.clone()),
    );
    session.api().script_history(Ok(empty_history()));
    session.load().await.unwrap();
    while events.try_recv().is_ok() {}
    (session, events, handle, clock)
}

async fn expect_send_failed(events: &mut mpsc::Receiver<SessionEvent>) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if matches!(event, SessionEvent::SendFailed { .. }) {
                return;
            }
        }
    })
    .await
    .expect("timed out waiting for SendFailed");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_failure_queues_and_retries_on_schedule() {
    let (session, _events, _handle, clock) = connected_session().await;
    // Initial attempt and first retry both time out; the second retry lands.
    session.api().script_send(Err(ApiError::Timeout));
    session.api().script_send(Err(ApiError::Timeout));

    let temp = session.send_message("hello?".into()).await.unwrap();
    assert!(session.is_send_pending(temp));
    assert_eq!(session.api().send_calls().len(), 1);

    // First retry after 5 seconds.
    clock.advance(Duration::from_secs(5));
    session.drain_retries().await;
    assert_eq!(session.api().send_calls().len(), 2);
    assert!(session.is_send_pending(temp));

    // Second retry after a further 15 seconds; this one succeeds.
    clock.advance(Duration::from_secs(15));
    session.drain_retries().await;
    assert_eq!(session.api().send_calls().len(), 3);
    assert!(!session.is_send_pending(temp));
    // Still pending in the list until the push echo confirms it.
    assert_eq!(session.messages()[0].status, MessageStatus::Pending);

    session.dispose().await;
}

#[tokio::test]
async fn three_failed_retries_mark_the_send_failed() {
    let (session, mut events, _handle, clock) = connected_session().await;
    for _ in 0..4 {
        session.api().script_send(Err(ApiError::Timeout));
    }

    let temp = session.send_message("hello?".into()).await.unwrap();

    for backoff in [5, 15, 30] {
        clock.advance(Duration::from_secs(backoff));
        session.drain_retries().await;
    }
    // Bound exhausted: the next evaluation fails it without a network call.
    session.drain_retries().await;
    expect_send_failed(&mut events).await;

    assert_eq!(
        session.api().send_calls().len(),
        4,
        "initial attempt plus exactly three retries"
    );
    assert!(!session.is_send_pending(temp));
    let msg = &session.messages()[0];
    assert_eq!(msg.status, MessageStatus::Failed);
    let retry = msg.retry.as_ref().unwrap();
    assert_eq!(retry.retry_count, 3);

    session.dispose().await;
}

#[tokio::test]
async fn manual_retry_resets_the_count_and_sends_immediately() {
    let (session, mut events, _handle, clock) = connected_session().await;
    for _ in 0..4 {
        session.api().script_send(Err(ApiError::Timeout));
    }
    let temp = session.send_message("hello?".into()).await.unwrap();
    for backoff in [5, 15, 30] {
        clock.advance(Duration::from_secs(backoff));
        session.drain_retries().await;
    }
    session.drain_retries().await;
    expect_send_failed(&mut events).await;

    // Manual retry: script succeeds this time (default response).
    assert!(session.retry_failed(temp).await);
    assert_eq!(session.api().send_calls().len(), 5);
    assert!(!session.is_send_pending(temp));
    let msg = &session.messages()[0];
    assert_eq!(msg.status, MessageStatus::Pending);
    assert_eq!(msg.retry.as_ref().unwrap().retry_count, 0);

    session.dispose().await;
}

#[tokio::test]
async fn retry_of_a_message_that_is_not_failed_is_refused() {
    let (session, _events, _handle, _clock) = connected_session().await;
    let temp = session.send_message("hello?".into()).await.unwrap();
    assert!(!session.retry_failed(temp).await);
    session.dispose().await;
}

#[tokio::test]
async fn permanent_rejection_fails_without_retries() {
    let (session, mut events, _handle, _clock) = connected_session().await;
    session.api().script_send(Err(ApiError::Http { status: 422 }));

    let temp = session.send_message("hello?".into()).await.unwrap();
    expect_send_failed(&mut events).await;

    assert_eq!(session.api().send_calls().len(), 1);
    assert!(!session.is_send_pending(temp));
    assert_eq!(session.messages()[0].status, MessageStatus::Failed);

    session.dispose().await;
}
