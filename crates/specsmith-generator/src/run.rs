//! Generation runs and their typed phase outputs

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use specsmith_model::{CodeBlock, Expectation, KeyConcepts, ValidationReport};

/// Status of a generation run
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GenerationStatus {
    ExtractingConcepts,
    ExtractingConstraints,
    GeneratingCode,
    ValidatingCode,
    FixingIssues,
    Completed,
    Error,
}

/// What the completed phases have produced so far.
///
/// Each variant carries everything the earlier ones did, so a run can only
/// move forward and a resume starts at the first missing output.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseOutputs {
    #[default]
    Empty,
    Concepts {
        concepts: KeyConcepts,
    },
    Constrained {
        concepts: KeyConcepts,
        constraints: Vec<String>,
    },
    Generated {
        concepts: KeyConcepts,
        constraints: Vec<String>,
        code: String,
        code_blocks: Vec<CodeBlock>,
    },
}

impl PhaseOutputs {
    #[must_use]
    pub fn concepts(&self) -> Option<&KeyConcepts> {
        match self {
            Self::Empty => None,
            Self::Concepts { concepts }
            | Self::Constrained { concepts, .. }
            | Self::Generated { concepts, .. } => Some(concepts),
        }
    }

    #[must_use]
    pub fn constraints(&self) -> Option<&[String]> {
        match self {
            Self::Constrained { constraints, .. } | Self::Generated { constraints, .. } => {
                Some(constraints)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn code(&self) -> Option<(&str, &[CodeBlock])> {
        match self {
            Self::Generated {
                code, code_blocks, ..
            } => Some((code, code_blocks)),
            _ => None,
        }
    }

    /// Phase that produces the next missing output; `None` once code exists
    #[must_use]
    pub fn next_phase(&self) -> Option<GenerationStatus> {
        match self {
            Self::Empty => Some(GenerationStatus::ExtractingConcepts),
            Self::Concepts { .. } => Some(GenerationStatus::ExtractingConstraints),
            Self::Constrained { .. } => Some(GenerationStatus::GeneratingCode),
            Self::Generated { .. } => None,
        }
    }
}

/// One code-generation attempt for one expectation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRun {
    /// Expectation id; runs are keyed by it
    pub id: String,
    /// Unique id of this attempt, carried into the generation record
    pub run_id: String,
    pub expectation: Expectation,
    pub status: GenerationStatus,
    pub message: String,
    pub outputs: PhaseOutputs,
    pub validation: Option<ValidationReport>,
    /// Whether the repair pass ran
    pub fix_attempted: bool,
    /// Whether the repair pass replaced the code
    pub fixed: bool,
    pub completed: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationRun {
    pub fn new(expectation: Expectation, run_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: expectation.id.clone(),
            run_id: run_id.into(),
            expectation,
            status: GenerationStatus::ExtractingConcepts,
            message: "Queued".to_string(),
            outputs: PhaseOutputs::Empty,
            validation: None,
            fix_attempted: false,
            fixed: false,
            completed: false,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Next phase to run, `None` when every phase is done
    #[must_use]
    pub fn next_phase(&self) -> Option<GenerationStatus> {
        if let Some(phase) = self.outputs.next_phase() {
            return Some(phase);
        }
        match &self.validation {
            None => Some(GenerationStatus::ValidatingCode),
            Some(report) if !report.valid && !self.fix_attempted => {
                Some(GenerationStatus::FixingIssues)
            }
            Some(_) => None,
        }
    }

    pub(crate) fn set_status(&mut self, status: GenerationStatus, message: impl Into<String>) {
        self.status = status;
        self.message = message.into();
        self.updated_at = Utc::now();
    }
}

/// Runs owned by one generator, keyed by expectation id
#[derive(Debug, Default)]
pub struct RunStore {
    runs: HashMap<String, GenerationRun>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&GenerationRun> {
        self.runs.get(id)
    }

    /// Remove a run for mutation; put it back with [`Self::insert`]
    pub fn take(&mut self, id: &str) -> Option<GenerationRun> {
        self.runs.remove(id)
    }

    pub fn insert(&mut self, run: GenerationRun) {
        self.runs.insert(run.id.clone(), run);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> GenerationRun {
        GenerationRun::new(Expectation::new_top("TaskPad", "Track tasks"), "run-1")
    }

    fn report(valid: bool) -> ValidationReport {
        ValidationReport {
            valid,
            issues: vec![],
            suggestions: vec![],
            note: None,
        }
    }

    #[test]
    fn test_next_phase_follows_outputs() {
        let mut run = run();
        assert_eq!(run.next_phase(), Some(GenerationStatus::ExtractingConcepts));

        run.outputs = PhaseOutputs::Concepts {
            concepts: KeyConcepts::default(),
        };
        assert_eq!(run.next_phase(), Some(GenerationStatus::ExtractingConstraints));

        run.outputs = PhaseOutputs::Generated {
            concepts: KeyConcepts::default(),
            constraints: vec![],
            code: "fn main() {}".to_string(),
            code_blocks: vec![],
        };
        assert_eq!(run.next_phase(), Some(GenerationStatus::ValidatingCode));

        run.validation = Some(report(false));
        assert_eq!(run.next_phase(), Some(GenerationStatus::FixingIssues));

        run.fix_attempted = true;
        assert_eq!(run.next_phase(), None);

        run.fix_attempted = false;
        run.validation = Some(report(true));
        assert_eq!(run.next_phase(), None);
    }

    #[test]
    fn test_accessors() {
        let outputs = PhaseOutputs::Constrained {
            concepts: KeyConcepts {
                entities: vec!["Task".to_string()],
                ..KeyConcepts::default()
            },
            constraints: vec!["offline".to_string()],
        };
        assert_eq!(outputs.concepts().unwrap().entities, vec!["Task"]);
        assert_eq!(outputs.constraints(), Some(&["offline".to_string()][..]));
        assert!(outputs.code().is_none());
        assert!(PhaseOutputs::Empty.concepts().is_none());
    }

    #[test]
    fn test_status_names() {
        assert_eq!(GenerationStatus::ExtractingConcepts.to_string(), "extracting_concepts");
        assert_eq!(GenerationStatus::FixingIssues.as_ref(), "fixing_issues");
    }

    #[test]
    fn test_store_is_keyed_by_expectation_id() {
        let run = run();
        let id = run.id.clone();
        let mut store = RunStore::new();
        store.insert(run);
        assert_eq!(store.get(&id).unwrap().run_id, "run-1");
        assert!(store.take(&id).is_some());
        assert!(store.is_empty());
    }
}
