//! Normalizing a decomposition into sub-expectations

use serde::Deserialize;
use uuid::Uuid;

use specsmith_model::{Expectation, ExpectationLevel};

/// Generic slices used to pad a decomposition that came out too small
const GENERIC_SLICES: &[(&str, &str)] = &[
    ("Core data model", "Define the entities and state the software manages"),
    ("User interaction", "Provide the interface through which users work with it"),
    ("Persistence", "Store and reload data reliably"),
    ("Validation and errors", "Reject invalid input and report failures clearly"),
    ("Testing", "Verify the acceptance criteria automatically"),
    ("Configuration", "Expose the settings operators need"),
    ("Documentation", "Explain setup and usage"),
];

/// Accepted shapes for the model's decomposition reply
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum DecompositionReply {
    Wrapped {
        #[serde(alias = "subs", alias = "components", alias = "sub_expectation")]
        sub_expectations: Vec<Expectation>,
    },
    List(Vec<Expectation>),
}

impl DecompositionReply {
    pub(crate) fn into_items(self) -> Vec<Expectation> {
        match self {
            Self::Wrapped { sub_expectations } => sub_expectations,
            Self::List(items) => items,
        }
    }
}

/// Turn `item` into a sub-expectation of `top` with a fresh identity
fn adopt(top: &Expectation, mut item: Expectation) -> Expectation {
    item.id = Uuid::new_v4().to_string();
    item.level = ExpectationLevel::Sub;
    item.parent_id = Some(top.id.clone());
    item.source_text = None;
    item.name = item.name.trim().to_string();
    item
}

/// Clamp model-proposed items into `min..=max` sub-expectations.
///
/// Returns `None` when fewer than `min` named items were proposed; the caller
/// then uses [`fallback`].
pub(crate) fn normalize(
    top: &Expectation,
    items: Vec<Expectation>,
    min: usize,
    max: usize,
) -> Option<Vec<Expectation>> {
    let usable: Vec<Expectation> = items
        .into_iter()
        .filter(|item| !item.name.trim().is_empty())
        .take(max)
        .collect();
    if usable.len() < min {
        return None;
    }
    Some(usable.into_iter().map(|item| adopt(top, item)).collect())
}

fn short_name(text: &str) -> String {
    const MAX_CHARS: usize = 60;
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX_CHARS).collect();
    format!("{}...", cut.trim_end())
}

/// Deterministic decomposition: one sub per acceptance criterion, padded with
/// generic slices up to `min` and capped at `max`.
pub(crate) fn fallback(top: &Expectation, min: usize, max: usize) -> Vec<Expectation> {
    let mut subs: Vec<Expectation> = top
        .acceptance_criteria
        .iter()
        .filter(|c| !c.trim().is_empty())
        .take(max)
        .map(|criterion| {
            Expectation::new_sub(top, short_name(criterion), criterion.trim())
                .with_criteria([criterion.trim()])
                .with_constraints(top.constraints.clone())
        })
        .collect();

    let subject = if top.name.trim().is_empty() {
        "the software".to_string()
    } else {
        top.name.trim().to_string()
    };
    let mut slices = GENERIC_SLICES.iter().cycle();
    while subs.len() < min {
        let Some((slice, purpose)) = slices.next() else {
            break;
        };
        subs.push(
            Expectation::new_sub(top, format!("{subject}: {slice}"), format!("{purpose} for {subject}"))
                .with_constraints(top.constraints.clone()),
        );
    }
    subs
}
