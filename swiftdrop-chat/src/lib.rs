//! SwiftDrop support chat — conversation synchronization engine.
//!
//! Keeps a single support ticket's message history consistent across an
//! unreliable real-time push channel, a paginated history API, a local
//! persistent cache, and optimistic local sends, while surviving
//! reconnects, app backgrounding, and partial failures.
//!
//! The [`session::ConversationSession`] is the entry point; everything else
//! is a collaborator it owns: the [`reconciler::Reconciler`] (sole owner of
//! the live message list), the [`retry::RetryQueue`], the
//! [`connection::ConnectionManager`], the
//! [`pagination::PaginationController`], the
//! [`presence::PresenceCoordinator`], and the [`cache::SnapshotCache`].

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod connection;
pub mod pagination;
pub mod presence;
pub mod reconciler;
pub mod retry;
pub mod session;
pub mod testing;
