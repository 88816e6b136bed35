//! History and send API request/response types.

use serde::{Deserialize, Serialize};

use crate::conversation::Conversation;
use crate::event::ServerMessage;
use crate::message::MessageId;

/// A request for a page of conversation history.
///
/// `limit` differs between the initial load (larger, for fast first paint)
/// and incremental pagination (smaller).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRequest {
    /// Maximum number of messages to return.
    pub limit: u32,
    /// Return only messages strictly older than this id. `None` asks for
    /// the newest page.
    pub older_than: Option<MessageId>,
}

/// Pagination metadata attached to a history response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// Whether older messages exist beyond this page.
    pub has_more: bool,
}

/// A page of conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryResponse {
    /// Current ticket metadata.
    pub conversation: Conversation,
    /// The page of messages, oldest first.
    pub messages: Vec<ServerMessage>,
    /// Pagination metadata.
    pub pagination: PageInfo,
}

/// Response to a send request.
///
/// The backend may acknowledge directly by returning the confirmed
/// message, or return nothing and rely on the push channel's
/// `new_message` echo. The client tolerates both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    /// The confirmed message, when the backend acknowledges directly.
    pub message: Option<ServerMessage>,
}
