//! Data model shared by the clarifier, the generator and the router
//!
//! Also defines the [`RecordStore`] contract through which finalized results
//! leave the core, and an in-memory implementation of it.

mod expectation;
mod records;
mod store;

pub use expectation::{Expectation, ExpectationLevel, UncertaintyPoint, is_default_name};
pub use records::{
    ClarificationMetadata, ClarificationRecord, CodeBlock, GenerationRecord, KeyConcepts,
    RequestRecord, ValidationReport,
};
pub use store::{InMemoryRecordStore, RecordStore, RecordStoreError};
