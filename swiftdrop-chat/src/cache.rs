//! Local cache store for conversation snapshots and scroll positions.
//!
//! The cache is written-to opportunistically (background transitions are
//! the designated save points) and read exactly once at cold start. It is
//! never the source of truth: a miss, corruption, or expiry silently falls
//! back to a full network reload.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use swiftdrop_proto::conversation::{Conversation, ConversationId};
use swiftdrop_proto::message::{Message, MessageId, Timestamp};

use crate::clock::SharedClock;
use crate::config::SyncConfig;

/// Errors that can occur during cache storage operations.
///
/// Callers above [`SnapshotCache`] never see these — every failure is
/// downgraded to a cache miss.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An underlying I/O operation failed.
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored entry could not be decoded.
    #[error("corrupt cache entry: {0}")]
    Corrupt(String),

    /// Could not determine the platform cache directory.
    #[error("could not determine cache directory")]
    NoCacheDir,
}

/// A persisted copy of a conversation's state, created on every successful
/// full or incremental load and read once at screen entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSnapshot {
    /// Ticket metadata at snapshot time.
    pub conversation: Conversation,
    /// The most recent messages (last N).
    pub messages: Vec<Message>,
    /// Whether older history existed beyond the snapshot.
    pub has_more_older: bool,
    /// When the snapshot was written (TTL anchor).
    pub cached_at: Timestamp,
}

/// A persisted scroll anchor, honored only while its anchor message is
/// still the newest one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollPosition {
    /// Opaque offset owned by the UI layer.
    pub offset: f64,
    /// Newest message at save time; a mismatch at restore time means new
    /// activity arrived and the view snaps to the bottom instead.
    pub last_message_id: MessageId,
    /// When the position was saved.
    pub saved_at: Timestamp,
}

/// Trait for persisting per-conversation snapshots and scroll positions.
///
/// Implementations: [`MemoryStore`] for tests and [`FileStore`] for the
/// device cache directory. Keys are conversation ids, so concurrent
/// screens for different conversations never interfere.
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot for a conversation, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the snapshot cannot be written.
    fn save_snapshot(
        &self,
        conversation: &ConversationId,
        snapshot: &CachedSnapshot,
    ) -> Result<(), StoreError>;

    /// Load the stored snapshot for a conversation, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a stored entry exists but cannot be read.
    fn load_snapshot(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<CachedSnapshot>, StoreError>;

    /// Persist a scroll position for a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the position cannot be written.
    fn save_scroll(
        &self,
        conversation: &ConversationId,
        scroll: &ScrollPosition,
    ) -> Result<(), StoreError>;

    /// Load the stored scroll position for a conversation, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a stored entry exists but cannot be read.
    fn load_scroll(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<ScrollPosition>, StoreError>;

    /// Drop all cached state for a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the entries cannot be removed.
    fn invalidate(&self, conversation: &ConversationId) -> Result<(), StoreError>;
}

/// TTL- and anchor-enforcing wrapper around any [`SnapshotStore`].
///
/// Every failure below this layer is logged and treated as a miss, so the
/// session above only ever sees `Some(fresh data)` or `None`.
pub struct SnapshotCache<S> {
    store: S,
    ttl: Duration,
    clock: SharedClock,
}

impl<S: SnapshotStore> SnapshotCache<S> {
    /// Wraps a store with the given TTL and clock.
    pub fn new(store: S, ttl: Duration, clock: SharedClock) -> Self {
        Self { store, ttl, clock }
    }

    /// Load the snapshot for a conversation if it is still fresh.
    ///
    /// An expired snapshot is discarded (and invalidated in the store) so
    /// the caller performs a full reload. Read errors are a miss.
    pub fn load_fresh(&self, conversation: &ConversationId) -> Option<CachedSnapshot> {
        let snapshot = match self.store.load_snapshot(conversation) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(%conversation, error = %err, "cache read failed, treating as miss");
                return None;
            }
        };

        let age = self.clock.now().millis_since(snapshot.cached_at);
        let ttl = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);
        if age > ttl {
            tracing::debug!(%conversation, age_ms = age, "cached snapshot expired, discarding");
            if let Err(err) = self.store.invalidate(conversation) {
                tracing::warn!(%conversation, error = %err, "failed to evict expired snapshot");
            }
            return None;
        }
        Some(snapshot)
    }

    /// Persist a snapshot, stamping it with the current instant.
    /// Write failures are logged, never surfaced.
    pub fn store_snapshot(
        &self,
        conversation: &ConversationId,
        conversation_meta: Conversation,
        messages: Vec<Message>,
        has_more_older: bool,
    ) {
        let snapshot = CachedSnapshot {
            conversation: conversation_meta,
            messages,
            has_more_older,
            cached_at: self.clock.now(),
        };
        if let Err(err) = self.store.save_snapshot(conversation, &snapshot) {
            tracing::warn!(%conversation, error = %err, "snapshot write failed");
        }
    }

    /// Persist a scroll position anchored to the given newest message.
    pub fn store_scroll(&self, conversation: &ConversationId, offset: f64, newest: MessageId) {
        let scroll = ScrollPosition {
            offset,
            last_message_id: newest,
            saved_at: self.clock.now(),
        };
        if let Err(err) = self.store.save_scroll(conversation, &scroll) {
            tracing::warn!(%conversation, error = %err, "scroll position write failed");
        }
    }

    /// Load the scroll position, honored only if its anchor still matches
    /// the newest message. New activity invalidates an old anchor and the
    /// view snaps to the bottom instead.
    pub fn restorable_scroll(
        &self,
        conversation: &ConversationId,
        newest: Option<&MessageId>,
    ) -> Option<ScrollPosition> {
        let scroll = match self.store.load_scroll(conversation) {
            Ok(Some(scroll)) => scroll,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(%conversation, error = %err, "scroll read failed, treating as miss");
                return None;
            }
        };
        if newest == Some(&scroll.last_message_id) {
            Some(scroll)
        } else {
            tracing::debug!(%conversation, "scroll anchor stale, snapping to bottom");
            None
        }
    }
}

/// In-memory implementation of [`SnapshotStore`] for tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<ConversationId, (Option<CachedSnapshot>, Option<ScrollPosition>)>>,
}

impl MemoryStore {
    /// Creates a new, empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn save_snapshot(
        &self,
        conversation: &ConversationId,
        snapshot: &CachedSnapshot,
    ) -> Result<(), StoreError> {
        self.entries
            .lock()
            .entry(conversation.clone())
            .or_default()
            .0 = Some(snapshot.clone());
        Ok(())
    }

    fn load_snapshot(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<CachedSnapshot>, StoreError> {
        Ok(self
            .entries
            .lock()
            .get(conversation)
            .and_then(|(snapshot, _)| snapshot.clone()))
    }

    fn save_scroll(
        &self,
        conversation: &ConversationId,
        scroll: &ScrollPosition,
    ) -> Result<(), StoreError> {
        self.entries
            .lock()
            .entry(conversation.clone())
            .or_default()
            .1 = Some(scroll.clone());
        Ok(())
    }

    fn load_scroll(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<ScrollPosition>, StoreError> {
        Ok(self
            .entries
            .lock()
            .get(conversation)
            .and_then(|(_, scroll)| scroll.clone()))
    }

    fn invalidate(&self, conversation: &ConversationId) -> Result<(), StoreError> {
        self.entries.lock().remove(conversation);
        Ok(())
    }
}

/// JSON-file-backed implementation of [`SnapshotStore`].
///
/// One pair of files per conversation under the app cache directory:
/// `<id>.snapshot.json` and `<id>.scroll.json`.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Creates a store under the platform cache directory
    /// (`<cache_dir>/swiftdrop`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoCacheDir`] if the platform cache directory
    /// cannot be determined, or an I/O error if it cannot be created.
    pub fn new() -> Result<Self, StoreError> {
        let dir = dirs::cache_dir()
            .ok_or(StoreError::NoCacheDir)?
            .join("swiftdrop");
        Self::at(dir)
    }

    /// Creates a store at the directory named by [`SyncConfig::cache_dir`],
    /// falling back to the platform default when none is configured.
    ///
    /// # Errors
    ///
    /// Same conditions as [`FileStore::new`] and [`FileStore::at`].
    pub fn from_config(config: &SyncConfig) -> Result<Self, StoreError> {
        match &config.cache_dir {
            Some(dir) => Self::at(dir.clone()),
            None => Self::new(),
        }
    }

    /// Creates a store at an explicit directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be created.
    pub fn at(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn snapshot_path(&self, conversation: &ConversationId) -> PathBuf {
        self.dir.join(format!("{conversation}.snapshot.json"))
    }

    fn scroll_path(&self, conversation: &ConversationId) -> PathBuf {
        self.dir.join(format!("{conversation}.scroll.json"))
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<Option<T>, StoreError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::Io(err)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn write_json<T: Serialize>(path: &PathBuf, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}

impl SnapshotStore for FileStore {
    fn save_snapshot(
        &self,
        conversation: &ConversationId,
        snapshot: &CachedSnapshot,
    ) -> Result<(), StoreError> {
        Self::write_json(&self.snapshot_path(conversation), snapshot)
    }

    fn load_snapshot(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<CachedSnapshot>, StoreError> {
        Self::read_json(&self.snapshot_path(conversation))
    }

    fn save_scroll(
        &self,
        conversation: &ConversationId,
        scroll: &ScrollPosition,
    ) -> Result<(), StoreError> {
        Self::write_json(&self.scroll_path(conversation), scroll)
    }

    fn load_scroll(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<ScrollPosition>, StoreError> {
        Self::read_json(&self.scroll_path(conversation))
    }

    fn invalidate(&self, conversation: &ConversationId) -> Result<(), StoreError> {
        for path in [
            self.snapshot_path(conversation),
            self.scroll_path(conversation),
        ] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(StoreError::Io(err)),
            }
        }
        Ok(())
    }
}
