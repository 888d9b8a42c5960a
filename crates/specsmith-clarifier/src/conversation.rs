//! Conversation state and the store that owns it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use specsmith_model::{Expectation, UncertaintyPoint};

/// Where a conversation stands
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConversationStage {
    /// Opened by a front end, no requirement received yet
    Introduction,
    /// Requirement received but no draft extracted yet
    #[default]
    Initial,
    /// Draft has open uncertainty points; waiting for the user's reply
    AwaitingDetails,
    /// Finalized; further messages get generic answers
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Finalized result: the top expectation and its decomposition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedExpectation {
    pub top: Expectation,
    pub subs: Vec<Expectation>,
}

/// One clarification session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub stage: ConversationStage,
    pub draft: Option<Expectation>,
    pub history: Vec<ChatMessage>,
    pub uncertainties: Vec<UncertaintyPoint>,
    pub result: Option<FinalizedExpectation>,
    pub questions_asked: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, stage: ConversationStage) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            stage,
            draft: None,
            history: Vec::new(),
            uncertainties: Vec::new(),
            result: None,
            questions_asked: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push_user(&mut self, text: &str) {
        self.push(Speaker::User, text);
    }

    pub fn push_assistant(&mut self, text: &str) {
        self.push(Speaker::Assistant, text);
    }

    fn push(&mut self, speaker: Speaker, text: &str) {
        let now = Utc::now();
        self.history.push(ChatMessage {
            speaker,
            text: text.to_string(),
            timestamp: now,
        });
        self.updated_at = now;
    }

    /// Every user message so far, joined by blank lines
    #[must_use]
    pub fn user_text(&self) -> String {
        self.history
            .iter()
            .filter(|m| m.speaker == Speaker::User)
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Number of user messages so far
    #[must_use]
    pub fn rounds(&self) -> u32 {
        let n = self
            .history
            .iter()
            .filter(|m| m.speaker == Speaker::User)
            .count();
        u32::try_from(n).unwrap_or(u32::MAX)
    }
}

/// Conversations owned by one clarifier, keyed by id
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: HashMap<String, Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.conversations.contains_key(id)
    }

    /// Remove a conversation for mutation; put it back with [`Self::insert`]
    pub fn take(&mut self, id: &str) -> Option<Conversation> {
        self.conversations.remove(id)
    }

    pub fn insert(&mut self, conversation: Conversation) {
        self.conversations
            .insert(conversation.id.clone(), conversation);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
