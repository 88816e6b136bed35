//! The message reconciler — the single authoritative, ordered,
//! deduplicated message list for one conversation.
//!
//! Everything else in the engine (push channel, history fetches, optimistic
//! sends, retry queue) only *proposes* changes by feeding events into
//! [`Reconciler::apply`]; the reconciler is the sole writer of the live
//! list. `apply` is idempotent per event thanks to key-based deduplication,
//! which is the system's correctness backstop against ordering races: the
//! push channel and background REST sync may independently deliver the same
//! message, in either order.

use std::collections::HashSet;

use swiftdrop_proto::conversation::Conversation;
use swiftdrop_proto::message::{
    Message, MessageId, MessageKey, MessageStatus, SendRequest, TempId, Timestamp,
};

/// A proposal to mutate the message list.
#[derive(Debug, Clone)]
pub enum ReconcilerEvent {
    /// A page of older history arrived.
    HistoryPage {
        /// The page, oldest first.
        older: Vec<Message>,
        /// Whether more history exists beyond this page.
        has_more: bool,
    },
    /// A message arrived on the push channel (or as a direct send ack).
    Realtime(Message),
    /// The user authored a message locally.
    OptimisticSend(Message),
    /// A delivery/read transition for a confirmed message.
    Ack {
        /// The message being acknowledged.
        id: MessageId,
        /// The status it advanced to.
        status: MessageStatus,
    },
    /// The remote party read the conversation up to a message.
    ReadReceipt {
        /// Newest own message covered by the receipt.
        up_to: MessageId,
    },
    /// Ticket metadata changed, optionally carrying a synthetic notice.
    StatusChange {
        /// The updated ticket metadata.
        conversation: Conversation,
        /// Optional system message describing the change.
        notice: Option<Message>,
    },
}

/// What an [`apply`](Reconciler::apply) call actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A new message was inserted in order.
    Appended(MessageKey),
    /// An optimistic entry was confirmed in place (same position).
    Confirmed(MessageKey),
    /// Older messages were prepended; `added` excludes duplicates.
    Prepended {
        /// Number of genuinely new messages.
        added: usize,
    },
    /// A message's status advanced.
    Advanced {
        /// The message that advanced.
        key: MessageKey,
        /// Its new status.
        status: MessageStatus,
    },
    /// Ticket metadata was updated.
    ConversationUpdated {
        /// Whether a synthetic notice was also appended.
        notice_appended: bool,
    },
    /// A read receipt advanced one or more own messages to `Read`.
    MarkedRead {
        /// How many messages advanced.
        count: usize,
    },
    /// The event had no effect (duplicate or stale).
    Ignored,
}

impl Applied {
    /// Whether the rendered message list changed.
    #[must_use]
    pub const fn list_changed(&self) -> bool {
        match self {
            Self::Appended(_) | Self::Confirmed(_) => true,
            Self::Prepended { added } => *added > 0,
            Self::Advanced { .. } => true,
            Self::ConversationUpdated { notice_appended } => *notice_appended,
            Self::MarkedRead { count } => *count > 0,
            Self::Ignored => false,
        }
    }
}

/// The canonical in-memory state of one conversation.
#[derive(Debug, Default)]
pub struct Reconciler {
    conversation: Option<Conversation>,
    /// Sorted by `created_at` ascending, arrival order as tiebreak.
    messages: Vec<Message>,
    /// Every identity (confirmed and provisional) the list holds.
    keys: HashSet<MessageKey>,
    has_more_older: bool,
}

impl Reconciler {
    /// Creates an empty reconciler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds state from a cached snapshot at cold start.
    ///
    /// Only valid on an empty reconciler; keys are re-registered from the
    /// snapshot's messages.
    pub fn seed(
        &mut self,
        conversation: Conversation,
        messages: Vec<Message>,
        has_more_older: bool,
    ) {
        debug_assert!(self.messages.is_empty(), "seed is a cold-start operation");
        self.conversation = Some(conversation);
        for msg in messages {
            if self.is_duplicate(&msg) {
                continue;
            }
            self.insert_sorted(msg);
        }
        self.has_more_older = has_more_older;
    }

    /// Applies a proposal. Applying the same event twice is a no-op.
    pub fn apply(&mut self, event: ReconcilerEvent) -> Applied {
        match event {
            ReconcilerEvent::HistoryPage { older, has_more } => {
                self.apply_history_page(older, has_more)
            }
            ReconcilerEvent::Realtime(msg) => self.apply_realtime(msg),
            ReconcilerEvent::OptimisticSend(msg) => self.apply_optimistic(msg),
            ReconcilerEvent::Ack { id, status } => self.apply_ack(&id, status),
            ReconcilerEvent::ReadReceipt { up_to } => self.apply_read_receipt(&up_to),
            ReconcilerEvent::StatusChange {
                conversation,
                notice,
            } => self.apply_status_change(conversation, notice),
        }
    }

    fn apply_history_page(&mut self, older: Vec<Message>, has_more: bool) -> Applied {
        let mut page: Vec<Message> = older
            .into_iter()
            .filter(|msg| !self.is_duplicate(msg))
            .collect();
        page.sort_by_key(|m| m.created_at);
        let added = page.len();

        for msg in &page {
            self.register_keys(msg);
        }
        // Older history goes in front of everything already rendered.
        self.messages.splice(0..0, page);
        self.has_more_older = has_more;
        Applied::Prepended { added }
    }

    fn apply_realtime(&mut self, msg: Message) -> Applied {
        // Confirmation of an optimistic entry replaces it in place, keeping
        // its position, rather than appending.
        if let Some(temp) = msg.temp_id {
            if let Some(pos) = self
                .messages
                .iter()
                .position(|m| m.optimistic && m.temp_id == Some(temp))
            {
                let key = msg.key();
                self.register_keys(&msg);
                self.messages[pos] = msg;
                return Applied::Confirmed(key);
            }
        }

        if self.is_duplicate(&msg) {
            // At-least-once transport: duplicate delivery is expected.
            tracing::debug!(key = %msg.key(), "duplicate message dropped");
            return Applied::Ignored;
        }

        let key = msg.key();
        self.insert_sorted(msg);
        Applied::Appended(key)
    }

    fn apply_optimistic(&mut self, msg: Message) -> Applied {
        if self.is_duplicate(&msg) {
            return Applied::Ignored;
        }
        let key = msg.key();
        self.insert_sorted(msg);
        Applied::Appended(key)
    }

    fn apply_ack(&mut self, id: &MessageId, status: MessageStatus) -> Applied {
        let Some(msg) = self
            .messages
            .iter_mut()
            .find(|m| m.id.as_ref() == Some(id))
        else {
            return Applied::Ignored;
        };
        if !msg.status.can_advance_to(status) {
            return Applied::Ignored;
        }
        msg.status = status;
        Applied::Advanced {
            key: msg.key(),
            status,
        }
    }

    fn apply_read_receipt(&mut self, up_to: &MessageId) -> Applied {
        let Some(end) = self
            .messages
            .iter()
            .position(|m| m.id.as_ref() == Some(up_to))
        else {
            return Applied::Ignored;
        };
        let mut count = 0;
        for msg in &mut self.messages[..=end] {
            // Optimistic entries have not reached the server yet, so a
            // receipt cannot cover them no matter how they sort.
            if !msg.is_remote()
                && !msg.optimistic
                && msg.status.can_advance_to(MessageStatus::Read)
            {
                msg.status = MessageStatus::Read;
                count += 1;
            }
        }
        if count == 0 {
            Applied::Ignored
        } else {
            Applied::MarkedRead { count }
        }
    }

    fn apply_status_change(
        &mut self,
        conversation: Conversation,
        notice: Option<Message>,
    ) -> Applied {
        self.conversation = Some(conversation);
        let notice_appended = match notice {
            Some(msg) if !self.is_duplicate(&msg) => {
                self.insert_sorted(msg);
                true
            }
            _ => false,
        };
        Applied::ConversationUpdated { notice_appended }
    }

    // -- mutation helpers ---------------------------------------------------

    /// Whether any identity of `msg` is already held.
    fn is_duplicate(&self, msg: &Message) -> bool {
        let by_id = msg
            .id
            .as_ref()
            .is_some_and(|id| self.keys.contains(&MessageKey::Confirmed(id.clone())));
        let by_temp = msg
            .temp_id
            .is_some_and(|temp| self.keys.contains(&MessageKey::Provisional(temp)));
        by_id || by_temp
    }

    fn register_keys(&mut self, msg: &Message) {
        if let Some(id) = &msg.id {
            self.keys.insert(MessageKey::Confirmed(id.clone()));
        }
        if let Some(temp) = msg.temp_id {
            self.keys.insert(MessageKey::Provisional(temp));
        }
    }

    /// Inserts preserving `created_at` ascending order with arrival order
    /// as the tiebreak (equal timestamps land after existing ones).
    fn insert_sorted(&mut self, msg: Message) {
        self.register_keys(&msg);
        let idx = self
            .messages
            .partition_point(|m| m.created_at <= msg.created_at);
        self.messages.insert(idx, msg);
    }

    // -- out-of-band send state ---------------------------------------------

    /// Marks an optimistic message as `Failed` after exhausted retries.
    /// Returns false if no matching unconfirmed entry exists.
    pub fn mark_failed(&mut self, temp: TempId) -> bool {
        let Some(msg) = self
            .messages
            .iter_mut()
            .find(|m| m.optimistic && m.temp_id == Some(temp))
        else {
            return false;
        };
        msg.status = MessageStatus::Failed;
        true
    }

    /// Records a resend attempt on an optimistic message's retry metadata.
    pub fn record_attempt(&mut self, temp: TempId, retry_count: u32, at: Timestamp) {
        if let Some(retry) = self
            .messages
            .iter_mut()
            .find(|m| m.optimistic && m.temp_id == Some(temp))
            .and_then(|m| m.retry.as_mut())
        {
            retry.retry_count = retry_count;
            retry.last_attempt_at = at;
        }
    }

    /// Resets a `Failed` message for a manual retry: status back to
    /// `Pending`, retry count back to zero. Returns the original payload
    /// for re-enqueueing.
    pub fn reset_for_retry(&mut self, temp: TempId, at: Timestamp) -> Option<SendRequest> {
        let msg = self
            .messages
            .iter_mut()
            .find(|m| m.optimistic && m.temp_id == Some(temp) && m.status == MessageStatus::Failed)?;
        msg.status = MessageStatus::Pending;
        let retry = msg.retry.as_mut()?;
        retry.retry_count = 0;
        retry.last_attempt_at = at;
        Some(retry.payload.clone())
    }

    // -- accessors ----------------------------------------------------------

    /// The rendered message list, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Current ticket metadata, if loaded.
    #[must_use]
    pub const fn conversation(&self) -> Option<&Conversation> {
        self.conversation.as_ref()
    }

    /// Whether older history exists beyond the loaded window.
    #[must_use]
    pub const fn has_more_older(&self) -> bool {
        self.has_more_older
    }

    /// Overrides the older-history flag from a fresh newest page, which
    /// supersedes whatever a cached snapshot claimed.
    pub const fn set_has_more_older(&mut self, has_more: bool) {
        self.has_more_older = has_more;
    }

    /// The oldest confirmed message id, used as the pagination cursor.
    #[must_use]
    pub fn oldest_confirmed_id(&self) -> Option<MessageId> {
        self.messages.iter().find_map(|m| m.id.clone())
    }

    /// The newest confirmed message id, used as the scroll anchor.
    #[must_use]
    pub fn newest_confirmed_id(&self) -> Option<MessageId> {
        self.messages.iter().rev().find_map(|m| m.id.clone())
    }

    /// The newest remote-authored message id — the mark-read candidate.
    #[must_use]
    pub fn newest_remote_id(&self) -> Option<MessageId> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_remote())
            .and_then(|m| m.id.clone())
    }

    /// The last `limit` messages, for snapshotting.
    #[must_use]
    pub fn tail(&self, limit: usize) -> Vec<Message> {
        let start = self.messages.len().saturating_sub(limit);
        self.messages[start..].to_vec()
    }
}
