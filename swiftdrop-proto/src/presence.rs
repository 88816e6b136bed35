//! Presence and typing types for the remote party.

use serde::{Deserialize, Serialize};

use crate::message::Timestamp;

/// Presence status of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    /// Actively using the app.
    Online,
    /// Idle (no recent input).
    Away,
    /// Disconnected.
    Offline,
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Away => write!(f, "away"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// A presence update for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// The user whose presence changed.
    pub user_id: String,
    /// The new presence status.
    pub status: PresenceStatus,
    /// When the user was last seen, if known.
    pub last_seen: Option<Timestamp>,
}

/// A typing indicator for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingIndicator {
    /// The user who is typing (or stopped).
    pub user_id: String,
    /// Whether the user is currently typing.
    pub is_typing: bool,
}
