//! Prompt text for every clarifier call
//!
//! Each builder returns the user message; the system message is shared.

use specsmith_model::{Expectation, UncertaintyPoint};

pub(crate) const SYSTEM: &str = "You are a requirements analyst. You turn informal \
software requests into precise, testable expectations. Answer in the exact format \
requested, without commentary.";

/// Format rules appended to every structured request
const YAML_ONLY: &str = "

OUTPUT RULES:
1. Reply with a single YAML document and nothing else
2. Do NOT wrap the document in prose or explain it
3. Use plain strings; do not invent fields that were not asked for";

fn draft_yaml(draft: &Expectation) -> String {
    let view = serde_json::json!({
        "name": draft.name,
        "description": draft.description,
        "acceptance_criteria": draft.acceptance_criteria,
        "constraints": draft.constraints,
    });
    serde_yaml::to_string(&view).unwrap_or_else(|_| view.to_string())
}

pub(crate) fn extract_expectation(text: &str) -> String {
    format!(
        "Extract a structured expectation from this software requirement.

REQUIREMENT:
{text}

Fill these fields:
name: short name of the software or feature
description: what it must do, in one or two sentences
acceptance_criteria: list of concrete, verifiable conditions
constraints: list of technical or business limits

Leave a field empty when the requirement does not say; never guess.{YAML_ONLY}"
    )
}

pub(crate) fn detect_ambiguity(draft: &Expectation, max_points: usize) -> String {
    format!(
        "Review this draft expectation for ambiguities, contradictions or unstated \
assumptions that would block implementation.

DRAFT:
{draft}
Report at most {max_points} points as:
points:
  - field: the field concerned
    issue: short tag
    message: what is unclear
    question: the question to ask the user

Reply with `points: []` when the draft is clear enough to implement.{YAML_ONLY}",
        draft = draft_yaml(draft),
    )
}

pub(crate) fn incorporate_clarification(
    draft: &Expectation,
    open: &[UncertaintyPoint],
    reply: &str,
) -> String {
    let questions = open
        .iter()
        .map(|p| format!("- {}", p.question.as_deref().unwrap_or(&p.message)))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Update the draft expectation with the user's answer.

DRAFT:
{draft}
QUESTIONS ASKED:
{questions}

USER ANSWER:
{reply}

Return the complete updated expectation with the fields name, description, \
acceptance_criteria and constraints. Keep everything the answer does not change.{YAML_ONLY}",
        draft = draft_yaml(draft),
    )
}

pub(crate) fn decompose(top: &Expectation, min: usize, max: usize) -> String {
    format!(
        "Split this expectation into between {min} and {max} independent \
sub-expectations that together cover it.

EXPECTATION:
{top}
Format:
sub_expectations:
  - name: ...
    description: ...
    acceptance_criteria: [...]
    constraints: [...]{YAML_ONLY}",
        top = draft_yaml(top),
    )
}

pub(crate) fn answer_finalized(top: &Expectation, subs: &[Expectation], message: &str) -> String {
    let components = subs
        .iter()
        .map(|s| format!("- {}: {}", s.name, s.description))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "This requirement has been finalized:
{top}
Components:
{components}

Answer the user's message about it in plain text. Do not change the requirement.

USER MESSAGE:
{message}",
        top = draft_yaml(top),
    )
}
