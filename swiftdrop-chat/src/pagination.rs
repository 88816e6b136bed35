//! History pagination.
//!
//! One fetch at a time: scroll handlers fire `near_top` repeatedly while
//! the user drags, so the controller collapses overlapping requests
//! instead of stacking them. It never touches the message list itself —
//! pages are handed back to the caller to feed through the reconciler.

use std::sync::atomic::{AtomicBool, Ordering};

use swiftdrop_proto::conversation::ConversationId;
use swiftdrop_proto::history::{HistoryRequest, HistoryResponse};
use swiftdrop_proto::message::MessageId;

use crate::api::{ApiError, SupportApi};

/// Guards single-flight history fetches.
pub struct PaginationController {
    in_flight: AtomicBool,
    initial_page_size: u32,
    page_size: u32,
}

/// Clears the in-flight flag even when the fetch future is dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl PaginationController {
    /// Creates a controller with the given page sizes.
    #[must_use]
    pub const fn new(initial_page_size: u32, page_size: u32) -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            initial_page_size,
            page_size,
        }
    }

    fn acquire(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlightGuard(&self.in_flight))
    }

    /// Whether a fetch is currently running.
    #[must_use]
    pub fn is_fetching(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Fetches the newest page of history (the initial load).
    ///
    /// Returns `None` when another fetch is already in flight.
    ///
    /// # Errors
    ///
    /// Propagates [`ApiError`] from the backend.
    pub async fn load_initial<A: SupportApi>(
        &self,
        api: &A,
        conversation: &ConversationId,
    ) -> Option<Result<HistoryResponse, ApiError>> {
        let _guard = self.acquire()?;
        let request = HistoryRequest {
            limit: self.initial_page_size,
            older_than: None,
        };
        Some(api.fetch_history(conversation, &request).await)
    }

    /// Fetches the page older than `oldest`, the current pagination cursor.
    ///
    /// Returns `None` without a request when a fetch is already running,
    /// when there is no more history, or when there is no cursor yet.
    ///
    /// # Errors
    ///
    /// Propagates [`ApiError`] from the backend.
    pub async fn fetch_older<A: SupportApi>(
        &self,
        api: &A,
        conversation: &ConversationId,
        oldest: Option<MessageId>,
        has_more: bool,
    ) -> Option<Result<HistoryResponse, ApiError>> {
        if !has_more {
            return None;
        }
        let cursor = oldest?;
        let _guard = self.acquire()?;
        let request = HistoryRequest {
            limit: self.page_size,
            older_than: Some(cursor),
        };
        tracing::debug!(conversation = %conversation, "fetching older history page");
        Some(api.fetch_history(conversation, &request).await)
    }
}
