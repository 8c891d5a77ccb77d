//! Conversation history storage
//!
//! Stores answered turns per session with timestamps, and renders the
//! most recent ones as context for follow-up questions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Turns included in a follow-up's context.
pub const CONTEXT_TURNS: usize = 3;

const TURN_SEPARATOR: &str = "==========================";

/// One answered query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub turn_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub query: String,
    /// Prose answer, or the chart description as JSON.
    pub response: String,
    pub category: String,
}

impl ConversationTurn {
    pub fn new(query: impl Into<String>, response: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            query: query.into(),
            response: response.into(),
            category: category.into(),
        }
    }
}

/// Conversation history for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub session_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    turns: VecDeque<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new(session_key: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            turns: VecDeque::new(),
        }
    }

    pub fn add_turn(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        self.updated_at = Utc::now();
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    /// The `count` most recent turns, oldest first.
    pub fn recent_turns(&self, count: usize) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter().skip(self.turns.len().saturating_sub(count))
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Recent turns rendered for a follow-up prompt.
    pub fn format_context(&self, count: usize) -> String {
        self.recent_turns(count)
            .map(|turn| {
                format!(
                    "Query: {} \nResponse: {}\n{}\n",
                    turn.query, turn.response, TURN_SEPARATOR
                )
            })
            .collect()
    }

}

/// In-memory histories keyed by session.
#[derive(Debug, Default)]
pub struct ConversationStore {
    sessions: RwLock<HashMap<String, ConversationHistory>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, session_key: &str, turn: ConversationTurn) {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_key.to_string())
            .or_insert_with(|| ConversationHistory::new(session_key))
            .add_turn(turn);
    }

    /// Context string for the session's next follow-up; empty when the
    /// session has no history.
    pub async fn context(&self, session_key: &str) -> String {
        self.sessions
            .read()
            .await
            .get(session_key)
            .map(|history| history.format_context(CONTEXT_TURNS))
            .unwrap_or_default()
    }

    pub async fn history(&self, session_key: &str) -> Option<ConversationHistory> {
        self.sessions.read().await.get(session_key).cloned()
    }

    pub async fn clear(&self) {
        self.sessions.write().await.clear();
    }
}
