//! Uncertainty detection
//!
//! Structural checks are deterministic and run locally. The semantic check is
//! one model call whose findings are appended after the structural ones.

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use specsmith_config::ClarifierConfig;
use specsmith_model::{Expectation, UncertaintyPoint, is_default_name};

pub(crate) const CRITERIA_QUESTION: &str =
    "What specific criteria must be met for this requirement to be considered complete?";

/// Deterministic checks over a draft expectation
#[derive(Debug, Clone)]
pub struct StructuralChecker {
    min_description_chars: usize,
    vague_terms: Vec<(String, Regex)>,
}

impl StructuralChecker {
    pub fn new(config: &ClarifierConfig) -> Self {
        let vague_terms = config
            .vague_terms
            .iter()
            .filter(|t| !t.trim().is_empty())
            .filter_map(|term| {
                let pattern = format!(r"(?i)(?:^|\W){}(?:\W|$)", regex::escape(term.trim()));
                match Regex::new(&pattern) {
                    Ok(re) => Some((term.trim().to_string(), re)),
                    Err(e) => {
                        warn!(term = %term, error = %e, "Skipping vague term");
                        None
                    }
                }
            })
            .collect();
        Self {
            min_description_chars: config.min_description_chars,
            vague_terms,
        }
    }

    /// Vague terms present in `text`, in configuration order
    #[must_use]
    pub fn vague_terms_in(&self, text: &str) -> Vec<&str> {
        self.vague_terms
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(term, _)| term.as_str())
            .collect()
    }

    /// All structural points for `draft`, in field order
    #[must_use]
    pub fn check(&self, draft: &Expectation) -> Vec<UncertaintyPoint> {
        let mut points = Vec::new();

        if is_default_name(&draft.name) {
            points.push(
                UncertaintyPoint::new("name", "missing", "The requirement has no name")
                    .with_question("What should this software or feature be called?"),
            );
        }

        let description = draft.description.trim();
        if description.is_empty() {
            points.push(
                UncertaintyPoint::new("description", "missing", "The requirement has no description")
                    .with_question("Can you describe what the software should do?"),
            );
        } else if description.chars().count() < self.min_description_chars {
            points.push(
                UncertaintyPoint::new(
                    "description",
                    "too_short",
                    format!("The description '{description}' is too short to implement"),
                )
                .with_question("Could you describe in more detail what it should do and who will use it?"),
            );
        }

        if draft.acceptance_criteria.iter().all(|c| c.trim().is_empty()) {
            points.push(
                UncertaintyPoint::new(
                    "acceptance_criteria",
                    "missing",
                    "No acceptance criteria were given",
                )
                .with_question(CRITERIA_QUESTION),
            );
        }

        let vague = self.vague_terms_in(description);
        if !vague.is_empty() {
            let listed = vague.join("', '");
            points.push(
                UncertaintyPoint::new(
                    "description",
                    "vague",
                    format!("The description uses vague terms: '{listed}'"),
                )
                .with_question(format!("What exactly do you mean by '{listed}'?")),
            );
        }

        points
    }
}

/// Model reply to the ambiguity review
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct SemanticFindings {
    #[serde(alias = "uncertainties", alias = "issues")]
    pub points: Vec<UncertaintyPoint>,
}

impl SemanticFindings {
    pub(crate) const FIELDS: &'static [&'static str] = &["points", "uncertainties", "issues"];

    /// Usable points, at most `max`, with empty tags filled in
    pub(crate) fn into_points(self, max: usize) -> Vec<UncertaintyPoint> {
        self.points
            .into_iter()
            .filter(|p| !p.message.trim().is_empty() || p.question.is_some())
            .take(max)
            .map(|mut p| {
                if p.field.trim().is_empty() {
                    p.field = "description".to_string();
                }
                if p.issue.trim().is_empty() {
                    p.issue = "ambiguous".to_string();
                }
                if p.message.trim().is_empty()
                    && let Some(q) = &p.question
                {
                    p.message = q.clone();
                }
                p
            })
            .collect()
    }
}
