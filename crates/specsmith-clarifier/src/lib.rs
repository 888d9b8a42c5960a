//! Requirement Clarifier
//!
//! Turns free-form requirement text into a finalized top-level
//! [`Expectation`](specsmith_model::Expectation) and its sub-expectations
//! through a multi-turn conversation:
//!
//! ```text
//! introduction ──▶ initial ──▶ awaiting_details ◀─┐
//!                     │              │            │ open points
//!                     │              └────────────┘
//!                     └──────────────┴──▶ completed
//! ```
//!
//! Each turn runs structural checks locally and one semantic check through
//! the [`ProviderRouter`](specsmith_llm::ProviderRouter). A draft with no open
//! points is decomposed and finalized.

mod checks;
mod clarifier;
mod conversation;
mod decompose;
mod prompts;

pub use checks::StructuralChecker;
pub use clarifier::{ClarificationResponse, Clarifier};
pub use conversation::{
    ChatMessage, Conversation, ConversationStage, ConversationStore, FinalizedExpectation, Speaker,
};

/// Purposes under which the clarifier calls the router
pub mod purpose {
    pub const EXTRACT_EXPECTATION: &str = "extract_expectation";
    pub const DETECT_AMBIGUITY: &str = "detect_ambiguity";
    pub const INCORPORATE_CLARIFICATION: &str = "incorporate_clarification";
    pub const DECOMPOSE: &str = "decompose";
    pub const ANSWER_FINALIZED: &str = "answer_finalized";
}
