//! Durable-for-the-session retry queue for outbound sends.
//!
//! Every optimistic send lands here until the server confirms it. Entries
//! are drained oldest-first with a fixed backoff schedule; an entry that
//! exhausts its retry bound is reported failed without another attempt.
//! Confirmations arriving out of band (push echo) remove entries directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use swiftdrop_proto::conversation::ConversationId;
use swiftdrop_proto::event::ServerMessage;
use swiftdrop_proto::message::{SendRequest, TempId, Timestamp};

use crate::api::SupportApi;
use crate::clock::SharedClock;
use crate::config::SyncConfig;

/// One outbound send awaiting confirmation.
#[derive(Debug, Clone)]
pub struct PendingSend {
    /// Provisional identity of the optimistic message.
    pub temp_id: TempId,
    /// The original payload, replayed verbatim.
    pub payload: SendRequest,
    /// Attempts made so far (the initial send does not count).
    pub retry_count: u32,
    /// When the last attempt was made.
    pub last_attempt_at: Timestamp,
    /// When the entry becomes eligible for its next evaluation.
    next_due_at: Timestamp,
}

/// Outcome of a [`RetryQueue::drain`] pass.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Entries the backend accepted, with the direct echo when present.
    pub sent: Vec<(TempId, Option<ServerMessage>)>,
    /// Entries that exhausted their retries (or hit a permanent error).
    pub failed: Vec<TempId>,
    /// Entries that failed transiently and were rescheduled:
    /// `(temp_id, retry_count, attempted_at)`.
    pub retried: Vec<(TempId, u32, Timestamp)>,
    /// Entries skipped because their backoff delay has not elapsed.
    pub deferred: usize,
}

impl DrainReport {
    /// Whether this pass changed any entry's state.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.sent.is_empty() && self.failed.is_empty() && self.retried.is_empty()
    }
}

/// Session-scoped queue of unconfirmed sends.
pub struct RetryQueue {
    entries: Mutex<Vec<PendingSend>>,
    draining: AtomicBool,
    connected: AtomicBool,
    config: SyncConfig,
    clock: SharedClock,
}

impl RetryQueue {
    /// Creates an empty queue. The retry bound and backoff schedule come
    /// from [`SyncConfig`], which stays the single owner of that policy.
    #[must_use]
    pub fn new(config: SyncConfig, clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            draining: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            config,
            clock,
        }
    }

    fn backoff_millis(&self, retries_made: u32) -> u64 {
        let delay = self.config.backoff_delay(retries_made);
        u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
    }

    /// Queues a send whose initial attempt just failed (or could not be
    /// made while offline). The first retry waits out the initial backoff.
    pub fn enqueue(&self, temp_id: TempId, payload: SendRequest) {
        let now = self.clock.now();
        let entry = PendingSend {
            temp_id,
            payload,
            retry_count: 0,
            last_attempt_at: now,
            next_due_at: now.plus_millis(self.backoff_millis(0)),
        };
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.temp_id == temp_id) {
            return;
        }
        tracing::debug!(temp_id = %temp_id, "send queued for retry");
        entries.push(entry);
    }

    /// Queues a send that has not been attempted at all (composed while
    /// offline). Due immediately, so the first reconnect drain sends it.
    pub fn enqueue_unattempted(&self, temp_id: TempId, payload: SendRequest) {
        let now = self.clock.now();
        let entry = PendingSend {
            temp_id,
            payload,
            retry_count: 0,
            last_attempt_at: now,
            next_due_at: now,
        };
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.temp_id == temp_id) {
            return;
        }
        tracing::debug!(temp_id = %temp_id, "offline send queued");
        entries.push(entry);
    }

    /// Re-queues a failed send after a manual retry: count reset to zero
    /// and due immediately.
    pub fn requeue(&self, temp_id: TempId, payload: SendRequest) {
        let now = self.clock.now();
        let entry = PendingSend {
            temp_id,
            payload,
            retry_count: 0,
            last_attempt_at: now,
            next_due_at: now,
        };
        let mut entries = self.entries.lock();
        entries.retain(|e| e.temp_id != temp_id);
        entries.push(entry);
    }

    /// Removes an entry, typically because its confirmation arrived on the
    /// push channel. Returns whether it was present.
    pub fn remove(&self, temp_id: TempId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.temp_id != temp_id);
        entries.len() < before
    }

    /// Whether a provisional id is still awaiting confirmation.
    #[must_use]
    pub fn contains(&self, temp_id: TempId) -> bool {
        self.entries.lock().iter().any(|e| e.temp_id == temp_id)
    }

    /// Number of unconfirmed sends.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Records connectivity; drains are skipped entirely while offline.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Current connectivity as last reported.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Time until the soonest entry becomes due, `None` when empty.
    /// Zero means at least one entry is due now.
    #[must_use]
    pub fn next_due_in(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.entries
            .lock()
            .iter()
            .map(|e| e.next_due_at.millis_since(now))
            .min()
            .map(Duration::from_millis)
    }

    /// Evaluates every due entry once: exhausted entries are dropped as
    /// failed, the rest are re-attempted against the backend.
    ///
    /// Only one drain runs at a time; a second concurrent call returns an
    /// empty report. Offline, nothing is attempted and everything counts
    /// as deferred.
    pub async fn drain<A: SupportApi>(
        &self,
        conversation: &ConversationId,
        api: &A,
    ) -> DrainReport {
        let mut report = DrainReport::default();
        if !self.is_connected() {
            report.deferred = self.len();
            return report;
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return report;
        }

        let now = self.clock.now();
        // Snapshot due entries outside the lock; the queue can shrink
        // underneath us when push-channel confirmations land mid-drain.
        let due: Vec<PendingSend> = {
            let entries = self.entries.lock();
            report.deferred = entries.iter().filter(|e| e.next_due_at > now).count();
            entries
                .iter()
                .filter(|e| e.next_due_at <= now)
                .cloned()
                .collect()
        };

        for entry in due {
            if !self.contains(entry.temp_id) {
                continue;
            }
            if entry.retry_count >= self.config.max_send_retries {
                // Bound exhausted: fail without another attempt.
                self.remove(entry.temp_id);
                tracing::warn!(
                    temp_id = %entry.temp_id,
                    retries = entry.retry_count,
                    "send failed permanently"
                );
                report.failed.push(entry.temp_id);
                continue;
            }

            match api.send_message(conversation, entry.temp_id, &entry.payload).await {
                Ok(response) => {
                    self.remove(entry.temp_id);
                    report.sent.push((entry.temp_id, response.message));
                }
                Err(err) if err.is_transient() => {
                    let attempted_at = self.clock.now();
                    let count = entry.retry_count + 1;
                    let due_at = if count >= self.config.max_send_retries {
                        // Next evaluation should fail it promptly.
                        attempted_at
                    } else {
                        attempted_at.plus_millis(self.backoff_millis(count))
                    };
                    let mut entries = self.entries.lock();
                    if let Some(e) = entries.iter_mut().find(|e| e.temp_id == entry.temp_id) {
                        e.retry_count = count;
                        e.last_attempt_at = attempted_at;
                        e.next_due_at = due_at;
                        report.retried.push((entry.temp_id, count, attempted_at));
                    }
                    tracing::debug!(
                        temp_id = %entry.temp_id,
                        retry = count,
                        error = %err,
                        "send retry failed"
                    );
                }
                Err(err) => {
                    self.remove(entry.temp_id);
                    tracing::warn!(temp_id = %entry.temp_id, error = %err, "send rejected");
                    report.failed.push(entry.temp_id);
                }
            }
        }

        self.draining.store(false, Ordering::SeqCst);
        report
    }
}
