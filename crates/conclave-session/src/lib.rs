//! Conversation state and its persistence collaborator.
//!
//! # Main types
//!
//! - [`ConversationState`]: Turn counter, context window, profile, and flags for one conversation.
//! - [`StateStore`]: Trait for loading and saving conversation state.
//! - [`FileStateStore`]: One JSON file per conversation on disk.
//! - [`InMemoryStateStore`]: Process-local store for tests and embedding.

/// Conversation state types.
pub mod state;
/// State persistence trait and implementations.
pub mod store;

pub use state::{ConversationState, EmotionalState, UserProfile};
pub use store::{FileStateStore, InMemoryStateStore, StateStore};
