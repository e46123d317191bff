//! Per-user conversation history.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

/// Who said it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: TurnRole, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp,
        }
    }

    pub fn user(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(TurnRole::User, text, timestamp)
    }

    pub fn assistant(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(TurnRole::Assistant, text, timestamp)
    }
}

/// A single user's bounded history. Oldest turns fall off first.
#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns: max_turns.max(1),
        }
    }

    pub fn add(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    /// The last `n` turns, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<Turn> {
        let start = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Histories for every user, each capped at `max_turns`.
pub struct ConversationStore {
    histories: RwLock<HashMap<String, ConversationMemory>>,
    max_turns: usize,
}

impl ConversationStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            histories: RwLock::new(HashMap::new()),
            max_turns: max_turns.max(1),
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Append a turn, evicting the user's oldest turn when over the cap.
    pub async fn append(&self, user_id: &str, turn: Turn) {
        let mut histories = self.histories.write().await;
        histories
            .entry(user_id.to_string())
            .or_insert_with(|| ConversationMemory::new(self.max_turns))
            .add(turn);
    }

    /// The user's history, oldest first. Empty for unknown users.
    pub async fn history(&self, user_id: &str) -> Vec<Turn> {
        self.last_n(user_id, self.max_turns).await
    }

    pub async fn last_n(&self, user_id: &str, n: usize) -> Vec<Turn> {
        let histories = self.histories.read().await;
        histories
            .get(user_id)
            .map(|memory| memory.last_n(n))
            .unwrap_or_default()
    }

    /// Forget the user's history. Clearing an unknown user is a no-op.
    pub async fn clear(&self, user_id: &str) {
        if self.histories.write().await.remove(user_id).is_some() {
            debug!(user_id, "Conversation history cleared");
        }
    }

    /// Number of users with any history.
    pub async fn user_count(&self) -> usize {
        self.histories.read().await.len()
    }
}
