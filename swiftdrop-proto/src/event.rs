//! Push channel wire frames.
//!
//! [`PushEvent`] covers every server-to-client topic the sync engine
//! consumes; [`ClientFrame`] is the small client-to-server vocabulary for
//! joining and leaving a conversation topic. Both are JSON-encoded by the
//! [`crate::codec`] module and carried as WebSocket text frames.

use serde::{Deserialize, Serialize};

use crate::conversation::{Conversation, ConversationId};
use crate::message::{
    Message, MessageId, MessageKind, MessageOrigin, MessageStatus, TempId, Timestamp,
};
use crate::presence::{PresenceUpdate, TypingIndicator};

/// A message as the server sends it, on the push channel or in history
/// responses.
///
/// `temp_id` echoes the client's provisional id when the message originated
/// from this device, which is how an optimistic entry is matched back to
/// its confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    /// Server-confirmed message identity.
    pub id: MessageId,
    /// The client temp id this message confirms, if any.
    pub temp_id: Option<TempId>,
    /// The message text.
    pub content: String,
    /// When the message was created.
    pub created_at: Timestamp,
    /// Server-formatted timestamp for display.
    pub display_timestamp: String,
    /// Who authored the message.
    pub origin: MessageOrigin,
    /// What kind of entry this is.
    pub kind: MessageKind,
    /// Delivery status as the server sees it.
    pub status: MessageStatus,
}

impl ServerMessage {
    /// Converts this wire message into the domain [`Message`].
    ///
    /// The result is confirmed (`optimistic = false`, no retry metadata)
    /// but keeps the echoed temp id so the reconciler can replace the
    /// matching optimistic entry in place.
    #[must_use]
    pub fn into_message(self) -> Message {
        Message {
            id: Some(self.id),
            temp_id: self.temp_id,
            content: self.content,
            created_at: self.created_at,
            display_timestamp: self.display_timestamp,
            origin: self.origin,
            kind: self.kind,
            status: self.status,
            optimistic: false,
            retry: None,
        }
    }
}

/// Server-to-client push channel events, tagged by topic name.
///
/// The push channel is at-least-once: any of these may be delivered more
/// than once, and `new_message` in particular may duplicate what a history
/// fetch already returned. Consumers must be idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload", rename_all = "snake_case")]
pub enum PushEvent {
    /// A new message in the joined conversation.
    NewMessage(ServerMessage),
    /// A delivery/read transition for a previously confirmed message.
    MessageAcknowledged {
        /// The message being acknowledged.
        message_id: MessageId,
        /// The status it advanced to (`delivered` or `read`).
        status: MessageStatus,
    },
    /// The remote party read the conversation up to a message.
    ConversationRead {
        /// The conversation that was read.
        conversation_id: ConversationId,
        /// Newest message covered by the receipt.
        up_to: MessageId,
    },
    /// The remote party started or stopped typing.
    TypingIndicator(TypingIndicator),
    /// Ticket metadata changed (status, priority, assignment).
    TicketStatusChanged {
        /// The updated ticket metadata.
        conversation: Conversation,
        /// Optional synthetic system message describing the change.
        notice: Option<ServerMessage>,
    },
    /// A user's presence changed.
    UserPresenceChanged(PresenceUpdate),
    /// The server accepted the connection.
    ConnectionEstablished,
    /// The server is about to drop the connection.
    ConnectionLost,
    /// The server confirmed a topic join.
    Joined {
        /// The conversation whose topic was joined.
        conversation_id: ConversationId,
    },
    /// The server rejected a frame.
    Error {
        /// Human-readable error description.
        reason: String,
    },
}

/// Client-to-server push channel frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Join a conversation topic. Must follow a successful connect; the
    /// server replies with [`PushEvent::Joined`] or [`PushEvent::Error`].
    Join {
        /// The conversation to subscribe to.
        conversation_id: ConversationId,
    },
    /// Leave a conversation topic.
    Leave {
        /// The conversation to unsubscribe from.
        conversation_id: ConversationId,
    },
    /// Report local typing state to the remote party.
    Typing {
        /// Whether the local user is typing.
        is_typing: bool,
    },
    /// Ask the server for the remote party's current presence.
    PresenceRequest,
}
