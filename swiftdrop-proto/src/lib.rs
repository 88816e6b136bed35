//! Shared wire and domain types for the SwiftDrop support chat backend.

pub mod codec;
pub mod conversation;
pub mod event;
pub mod history;
pub mod message;
pub mod presence;
