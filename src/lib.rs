//! specsmith - requirement clarification and resumable code generation
//!
//! Turns an informal software request into a structured [`Expectation`]
//! through a short conversation, then generates code for it in phases that
//! can be resumed after a failure. Every model call goes through one
//! [`ProviderRouter`], which falls back across the configured providers and
//! records usage and request history.
//!
//! specsmith can be used in two ways:
//! - **CLI**: `specsmith chat --generate`, `specsmith generate -e spec.yaml`
//! - **Library**: build a [`Pipeline`] and drive its clarifier and generator
//!
//! # Quick Start (Library)
//!
//! ```rust,no_run
//! use specsmith::{CliArgs, Config, ConversationStage, Pipeline};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Config::discover(&CliArgs::default())?;
//! let mut pipeline = Pipeline::from_config(&config)?;
//!
//! let mut response = pipeline
//!     .clarifier
//!     .clarify_requirement("A todo app with due dates", None)
//!     .await;
//! while response.stage != ConversationStage::Completed {
//!     let answer = "Tasks can be added, completed and listed by due date";
//!     response = pipeline
//!         .clarifier
//!         .continue_conversation(&response.conversation_id, answer)
//!         .await;
//! }
//!
//! if let Some(expectation) = &response.expectation {
//!     let generated = pipeline.generator.generate(expectation, None).await;
//!     println!("{}", generated.code.unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Components
//!
//! - [`ProviderRouter`] - ordered provider fallback with usage and history
//! - [`Clarifier`] - conversation state machine producing expectations
//! - [`CodeGenerator`] - phase pipeline emitting [`GenerationEvent`]s
//! - [`Pipeline`] - the three wired together, plus record syncing

pub mod cli;
mod pipeline;

pub use pipeline::{Pipeline, SyncSummary};

pub use specsmith_clarifier::{ClarificationResponse, Clarifier, Conversation, ConversationStage};
pub use specsmith_config::{CliArgs, Config, ConfigSource};
pub use specsmith_generator::{
    CodeGenerator, GenerationEvent, GenerationResponse, GenerationStatus, ResponseStatus,
};
pub use specsmith_llm::{GenerateOptions, LlmBackend, ProviderRouter, ProviderUsage};
pub use specsmith_model::{
    CodeBlock, Expectation, ExpectationLevel, InMemoryRecordStore, RecordStore, RecordStoreError,
    ValidationReport,
};
pub use specsmith_utils::{ConfigError, ExitCode, LlmError, UserFriendlyError};

#[doc(hidden)]
pub use specsmith_clarifier as clarifier;
#[doc(hidden)]
pub use specsmith_config as config;
#[doc(hidden)]
pub use specsmith_generator as generator;
#[doc(hidden)]
pub use specsmith_llm as llm;
#[doc(hidden)]
pub use specsmith_model as model;
#[doc(hidden)]
pub use specsmith_utils as utils;
