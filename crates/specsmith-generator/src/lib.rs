//! Code Generator
//!
//! A resumable phase pipeline from a finalized expectation to code:
//!
//! 1. `extracting_concepts`: entities, relationships and actions
//! 2. `extracting_constraints`: explicit constraints plus inferred ones
//! 3. `generating_code`: optionally streamed, code blocks published as found
//! 4. `validating_code`: self-review, followed by at most one `fixing_issues`
//!
//! Any phase can move the run to `error`; outputs of the phases before it are
//! kept and [`CodeGenerator::resume_generation`] continues from there.

mod events;
mod generator;
mod prompts;
mod run;

pub use events::GenerationEvent;
pub use generator::{CodeGenerator, GenerationResponse, ResponseStatus, merge_constraints};
pub use run::{GenerationRun, GenerationStatus, PhaseOutputs, RunStore};

/// Purposes under which the generator calls the router
pub mod purpose {
    pub const EXTRACT_CONCEPTS: &str = "extract_concepts";
    pub const INFER_CONSTRAINTS: &str = "infer_constraints";
    pub const GENERATE_CODE: &str = "generate_code";
    pub const VALIDATE_CODE: &str = "validate_code";
    pub const FIX_CODE: &str = "fix_code";
}
