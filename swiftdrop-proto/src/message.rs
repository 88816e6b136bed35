//! Message data model for a support conversation.
//!
//! A message carries two possible identities: a server-confirmed
//! [`MessageId`] and a client-generated [`TempId`] used while the message is
//! still optimistic. The [`MessageKey`] derived from them is the single
//! deduplication key the sync engine uses everywhere.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed message content size in bytes (8 KB).
pub const MAX_CONTENT_SIZE: usize = 8 * 1024;

/// Server-assigned message identity.
///
/// Backend ids are opaque strings; the client never parses them, only
/// compares them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Wraps a server-assigned identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated provisional identity for an unconfirmed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TempId(Uuid);

impl TempId {
    /// Creates a fresh provisional identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The nil temp id, used only as an unreachable fallback by
    /// [`Message::key`].
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TempId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally-unique deduplication key for a message.
///
/// Confirmed and provisional keys never collide: server ids are opaque
/// strings and temp ids are UUIDs generated locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// Server-confirmed identity.
    Confirmed(MessageId),
    /// Provisional identity of an unconfirmed optimistic message.
    Provisional(TempId),
}

impl std::fmt::Display for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Confirmed(id) => write!(f, "{id}"),
            Self::Provisional(temp) => write!(f, "tmp:{temp}"),
        }
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed from `earlier` to `self`, zero if `earlier`
    /// is in the future.
    #[must_use]
    pub const fn millis_since(&self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Returns this timestamp shifted forward by `millis`.
    #[must_use]
    pub const fn plus_millis(&self, millis: u64) -> Self {
        Self(self.0.saturating_add(millis))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    /// The customer using the app.
    Customer,
    /// A support agent.
    Agent,
    /// The backend itself (status notices and similar).
    System,
}

/// What kind of entry a message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A regular text message.
    Text,
    /// A synthetic notice injected on ticket status changes.
    SystemNotice,
}

/// Delivery lifecycle of a message.
///
/// Transitions only move forward (`Pending → Sent → Delivered → Read`).
/// `Failed` is terminal for the automatic retry path but recoverable by a
/// manual retry, which resets the message to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Created locally, not yet accepted by the transport.
    Pending,
    /// Accepted by the transport, awaiting delivery confirmation.
    Sent,
    /// Delivery confirmed by the backend.
    Delivered,
    /// Read by the remote party.
    Read,
    /// All automatic retries exhausted.
    Failed,
}

impl MessageStatus {
    /// Position of this status in the forward-only lifecycle.
    ///
    /// `Failed` sits outside the ladder and never ranks above `Read`, so an
    /// acknowledgment can never "advance" a message into failure.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
            Self::Failed => 0,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition.
    ///
    /// Read receipts may skip intermediate states (`Sent → Read` is valid);
    /// regressions and self-transitions are not.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        !matches!(next, Self::Failed) && next.rank() > self.rank()
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Sent => write!(f, "sent"),
            Self::Delivered => write!(f, "delivered"),
            Self::Read => write!(f, "read"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Error returned when a send payload fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message content is empty.
    #[error("message content is empty")]
    Empty,
    /// Message content exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the content in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// The payload of an outbound send, kept verbatim so replays are exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    /// The message text.
    pub content: String,
    /// What kind of message is being sent.
    pub message_type: MessageKind,
}

impl SendRequest {
    /// Validates this payload for sending.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] if the content is empty, or
    /// [`ValidationError::TooLarge`] if it exceeds [`MAX_CONTENT_SIZE`].
    pub const fn validate(&self) -> Result<(), ValidationError> {
        if self.content.is_empty() {
            return Err(ValidationError::Empty);
        }
        let size = self.content.len();
        if size > MAX_CONTENT_SIZE {
            return Err(ValidationError::TooLarge {
                size,
                max: MAX_CONTENT_SIZE,
            });
        }
        Ok(())
    }
}

/// Retry bookkeeping attached to a message while it is `Pending` or
/// `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryMeta {
    /// How many resend attempts have been made.
    pub retry_count: u32,
    /// When the last attempt was made.
    pub last_attempt_at: Timestamp,
    /// The original payload, replayed verbatim on retry.
    pub payload: SendRequest,
}

/// A single chat entry as held by the sync engine.
///
/// Invariant: at least one of `id` / `temp_id` is set. The constructors
/// ([`Message::optimistic`] and `ServerMessage::into_message`) guarantee
/// this, which makes [`Message::key`] total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-confirmed identity, absent while the message is optimistic.
    pub id: Option<MessageId>,
    /// Client-generated provisional identity, kept until confirmation.
    pub temp_id: Option<TempId>,
    /// The message text.
    pub content: String,
    /// When the message was created.
    pub created_at: Timestamp,
    /// Server-formatted timestamp for display; the engine never parses it.
    pub display_timestamp: String,
    /// Who authored the message.
    pub origin: MessageOrigin,
    /// What kind of entry this is.
    pub kind: MessageKind,
    /// Current delivery status.
    pub status: MessageStatus,
    /// True until the server has confirmed the message.
    pub optimistic: bool,
    /// Retry bookkeeping, present only while `Pending` or `Failed`.
    pub retry: Option<RetryMeta>,
}

impl Message {
    /// Builds a fresh optimistic message for a local send.
    ///
    /// The message starts `Pending` with `optimistic = true`, a new temp
    /// id, and retry metadata carrying the original payload.
    #[must_use]
    pub fn optimistic(payload: SendRequest, created_at: Timestamp) -> Self {
        Self {
            id: None,
            temp_id: Some(TempId::new()),
            content: payload.content.clone(),
            created_at,
            display_timestamp: String::new(),
            origin: MessageOrigin::Customer,
            kind: payload.message_type,
            status: MessageStatus::Pending,
            optimistic: true,
            retry: Some(RetryMeta {
                retry_count: 0,
                last_attempt_at: created_at,
                payload,
            }),
        }
    }

    /// Returns the deduplication key, preferring the confirmed id.
    #[must_use]
    pub fn key(&self) -> MessageKey {
        match (&self.id, self.temp_id) {
            (Some(id), _) => MessageKey::Confirmed(id.clone()),
            (None, Some(temp)) => MessageKey::Provisional(temp),
            // Unreachable through the constructors; see the type invariant.
            (None, None) => MessageKey::Provisional(TempId::nil()),
        }
    }

    /// Whether this message was authored by the remote side (agent or
    /// system), which is what read receipts are emitted for.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        !matches!(self.origin, MessageOrigin::Customer)
    }
}
