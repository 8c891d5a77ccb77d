//! Conversation memory
//!
//! Keeps each session's answered turns so follow-up questions can be
//! answered with the last few exchanges as context

pub mod store;

pub use store::{ConversationHistory, ConversationStore, ConversationTurn, CONTEXT_TURNS};
