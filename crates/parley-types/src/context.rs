//! Conversational context types: precomputed user context and the cached
//! recent-conversation window.

use serde::{Deserialize, Serialize};

use crate::llm::MessageRole;

/// One prior turn of conversation, as sent by clients or cached server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorTurn {
    pub role: MessageRole,
    pub content: String,
}

/// Precomputed, slowly changing knowledge about a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    #[serde(default)]
    pub summary: Option<String>,
    /// Topics the user talks about often; seeds speculative prefetch.
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub preferences: Vec<String>,
}

impl UserContext {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.topics.is_empty() && self.preferences.is_empty()
    }
}

/// Cached window of the most recent exchanges for a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationContext {
    #[serde(default)]
    pub turns: Vec<PriorTurn>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl ConversationContext {
    /// Append an exchange, keeping at most `max_turns` of the newest turns.
    pub fn push_exchange(&mut self, user: &str, assistant: &str, max_turns: usize) {
        self.turns.push(PriorTurn {
            role: MessageRole::User,
            content: user.to_string(),
        });
        self.turns.push(PriorTurn {
            role: MessageRole::Assistant,
            content: assistant.to_string(),
        });
        if self.turns.len() > max_turns {
            let overflow = self.turns.len() - max_turns;
            self.turns.drain(..overflow);
        }
    }
}
