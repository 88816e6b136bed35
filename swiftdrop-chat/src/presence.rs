//! Remote presence, typing state, and read-receipt gating.
//!
//! The coordinator tracks what the remote party is doing and decides when
//! the local user has actually "read" incoming messages: only while the
//! conversation screen is both visible and foregrounded, and never twice
//! for the same newest message. The debounce timer itself lives in the
//! session; this type only answers "should a receipt be sent, and for
//! which message".

use parking_lot::Mutex;
use swiftdrop_proto::message::{MessageId, Timestamp};
use swiftdrop_proto::presence::{PresenceStatus, PresenceUpdate, TypingIndicator};

/// Whether the conversation UI can currently be seen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenState {
    /// The conversation screen is on display.
    pub visible: bool,
    /// The app itself is foregrounded.
    pub foregrounded: bool,
}

impl ScreenState {
    /// Messages count as read only when both hold.
    #[must_use]
    pub const fn active(self) -> bool {
        self.visible && self.foregrounded
    }
}

impl Default for ScreenState {
    fn default() -> Self {
        Self {
            visible: true,
            foregrounded: true,
        }
    }
}

/// Last known state of the remote party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePresence {
    /// Online/away/offline.
    pub status: PresenceStatus,
    /// When they were last seen, if the server reports it.
    pub last_seen: Option<Timestamp>,
    /// Whether they are typing right now.
    pub is_typing: bool,
}

impl Default for RemotePresence {
    fn default() -> Self {
        Self {
            status: PresenceStatus::Offline,
            last_seen: None,
            is_typing: false,
        }
    }
}

/// Tracks remote presence and decides when to emit read receipts.
#[derive(Debug, Default)]
pub struct PresenceCoordinator {
    remote: Mutex<RemotePresence>,
    screen: Mutex<ScreenState>,
    /// Newest message id a receipt has already been sent for.
    last_marked: Mutex<Option<MessageId>>,
}

impl PresenceCoordinator {
    /// Creates a coordinator with the screen assumed active.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a presence update. Returns whether anything changed.
    pub fn observe_presence(&self, update: &PresenceUpdate) -> bool {
        let mut remote = self.remote.lock();
        let changed = remote.status != update.status || remote.last_seen != update.last_seen;
        remote.status = update.status;
        remote.last_seen = update.last_seen;
        changed
    }

    /// Records a typing indicator. Returns whether it flipped.
    pub fn observe_typing(&self, indicator: &TypingIndicator) -> bool {
        let mut remote = self.remote.lock();
        let changed = remote.is_typing != indicator.is_typing;
        remote.is_typing = indicator.is_typing;
        changed
    }

    /// A typing remote party is implicitly online; going offline clears
    /// any stale typing state.
    pub fn clear_typing(&self) -> bool {
        let mut remote = self.remote.lock();
        let was_typing = remote.is_typing;
        remote.is_typing = false;
        was_typing
    }

    /// Last known remote presence.
    #[must_use]
    pub fn remote(&self) -> RemotePresence {
        self.remote.lock().clone()
    }

    /// Records screen visibility and app foreground state.
    pub fn set_screen(&self, visible: bool, foregrounded: bool) {
        *self.screen.lock() = ScreenState {
            visible,
            foregrounded,
        };
    }

    /// Current screen state.
    #[must_use]
    pub fn screen(&self) -> ScreenState {
        *self.screen.lock()
    }

    /// The message a read receipt should be sent for, if any.
    ///
    /// `newest_remote` is the newest remote-authored message currently in
    /// the list. Returns `None` while the screen is inactive or when a
    /// receipt for that message was already sent.
    #[must_use]
    pub fn candidate(&self, newest_remote: Option<&MessageId>) -> Option<MessageId> {
        if !self.screen().active() {
            return None;
        }
        let newest = newest_remote?;
        if self.last_marked.lock().as_ref() == Some(newest) {
            return None;
        }
        Some(newest.clone())
    }

    /// Records that a receipt for `id` has been sent.
    pub fn record_marked(&self, id: MessageId) {
        *self.last_marked.lock() = Some(id);
    }
}
