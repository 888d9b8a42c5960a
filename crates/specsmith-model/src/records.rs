use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Expectation;

/// Entities, relationships and actions pulled out of an expectation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConcepts {
    pub entities: Vec<String>,
    pub relationships: Vec<String>,
    pub actions: Vec<String>,
}

impl KeyConcepts {
    pub const FIELDS: &'static [&'static str] = &["entities", "relationships", "actions"];

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty() && self.actions.is_empty()
    }
}

/// One fenced code block found in model output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    /// Info string after the opening fence, lowercased; empty when absent
    pub language: String,
    pub code: String,
}

/// Outcome of the self-validation phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Set when the verdict was not taken from the model's answer as-is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationMetadata {
    /// Number of user messages the conversation took
    pub rounds: u32,
    pub questions_asked: u32,
    pub source_text: String,
    pub completed_at: DateTime<Utc>,
}

/// Finalized clarification result: the top expectation and its decomposition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationRecord {
    pub conversation_id: String,
    pub top: Expectation,
    pub subs: Vec<Expectation>,
    pub metadata: ClarificationMetadata,
}

/// Result of a completed generation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub run_id: String,
    pub expectation_id: String,
    pub code: String,
    pub code_blocks: Vec<CodeBlock>,
    pub concepts: KeyConcepts,
    pub constraints: Vec<String>,
    pub validation: Option<ValidationReport>,
    /// Whether the repair pass replaced the code
    pub fixed: bool,
    pub completed_at: DateTime<Utc>,
}

/// One attempted provider request, successful or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub purpose: String,
    pub prompt_chars: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_input: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_output: Option<u64>,
    pub duration_ms: u64,
}
