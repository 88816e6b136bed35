//! Support ticket (conversation) metadata.

use serde::{Deserialize, Serialize};

use crate::message::Timestamp;

/// Identifies a support conversation (ticket).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wraps a server-assigned conversation identifier.
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

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a support ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Newly opened, not yet assigned.
    Open,
    /// Assigned to an agent.
    Assigned,
    /// Escalated to a higher support tier.
    Escalated,
    /// Resolved and closed.
    Closed,
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Assigned => write!(f, "assigned"),
            Self::Escalated => write!(f, "escalated"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Priority of a support ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    /// No urgency.
    Low,
    /// Default priority.
    Normal,
    /// Needs prompt attention.
    High,
    /// Blocking issue (lost package, payment dispute).
    Urgent,
}

/// A party to the conversation (customer or agent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyRef {
    /// Backend user identifier.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// Support ticket metadata.
///
/// Mutated by `ticket_status_changed` events; never deleted client-side,
/// only evicted from the cache on expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Ticket identifier.
    pub id: ConversationId,
    /// Current lifecycle state.
    pub status: TicketStatus,
    /// Current priority.
    pub priority: TicketPriority,
    /// Free-form category (e.g. "delivery_delay", "damaged_package").
    pub category: String,
    /// The customer who opened the ticket.
    pub customer: PartyRef,
    /// The assigned agent, if any.
    pub agent: Option<PartyRef>,
    /// When the ticket last saw activity.
    pub last_activity: Timestamp,
}
