//! Prompt text for the generation phases

use specsmith_model::{Expectation, KeyConcepts, ValidationReport};

pub(crate) const SYSTEM: &str = "You are a senior software engineer. You write complete, \
idiomatic, working code that satisfies the given requirement exactly.";

const YAML_ONLY: &str = "

Reply with a single YAML document and nothing else.";

fn requirement(expectation: &Expectation) -> String {
    let mut text = format!("Name: {}\nDescription: {}\n", expectation.name, expectation.description);
    if !expectation.acceptance_criteria.is_empty() {
        text.push_str("Acceptance criteria:\n");
        for c in &expectation.acceptance_criteria {
            text.push_str(&format!("- {c}\n"));
        }
    }
    text
}

fn bullets(items: &[String]) -> String {
    if items.is_empty() {
        return "- (none)".to_string();
    }
    items.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n")
}

fn concepts_text(concepts: &KeyConcepts) -> String {
    format!(
        "Entities:\n{}\nRelationships:\n{}\nActions:\n{}",
        bullets(&concepts.entities),
        bullets(&concepts.relationships),
        bullets(&concepts.actions)
    )
}

pub(crate) fn extract_concepts(expectation: &Expectation) -> String {
    format!(
        "Identify the key concepts of this requirement.

REQUIREMENT:
{}
Format:
entities: [things the software manages]
relationships: [how the entities relate]
actions: [operations users or the system perform]{YAML_ONLY}",
        requirement(expectation)
    )
}

pub(crate) fn infer_constraints(expectation: &Expectation, concepts: &KeyConcepts) -> String {
    format!(
        "List the implicit technical constraints this requirement implies but does not \
state. Do not repeat the explicit ones.

REQUIREMENT:
{}
EXPLICIT CONSTRAINTS:
{}

KEY CONCEPTS:
{}

Format:
constraints: [...]{YAML_ONLY}",
        requirement(expectation),
        bullets(&expectation.constraints),
        concepts_text(concepts)
    )
}

pub(crate) fn generate_code(
    expectation: &Expectation,
    concepts: &KeyConcepts,
    constraints: &[String],
) -> String {
    format!(
        "Write the code implementing this requirement.

REQUIREMENT:
{}
KEY CONCEPTS:
{}

CONSTRAINTS:
{}

Put every file in its own fenced code block tagged with its language.",
        requirement(expectation),
        concepts_text(concepts),
        bullets(constraints)
    )
}

pub(crate) fn validate_code(
    expectation: &Expectation,
    concepts: &KeyConcepts,
    constraints: &[String],
    code: &str,
) -> String {
    format!(
        "Review this code against its requirement.

REQUIREMENT:
{}
KEY CONCEPTS:
{}

CONSTRAINTS:
{}

CODE:
{code}

Format:
valid: true or false
issues: [problems that make the code incorrect or incomplete]
suggestions: [concrete fixes]{YAML_ONLY}",
        requirement(expectation),
        concepts_text(concepts),
        bullets(constraints)
    )
}

pub(crate) fn fix_code(expectation: &Expectation, code: &str, report: &ValidationReport) -> String {
    format!(
        "Fix the issues found in this code. Return the complete corrected code in fenced \
code blocks.

REQUIREMENT:
{}
CODE:
{code}

ISSUES:
{}

SUGGESTIONS:
{}",
        requirement(expectation),
        bullets(&report.issues),
        bullets(&report.suggestions)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirement_lists_criteria() {
        let e = Expectation::new_top("TaskPad", "Track tasks").with_criteria(["Add a task"]);
        let text = requirement(&e);
        assert!(text.contains("Name: TaskPad"));
        assert!(text.contains("- Add a task"));
    }

    #[test]
    fn test_empty_lists_are_marked() {
        let e = Expectation::new_top("TaskPad", "Track tasks");
        let p = infer_constraints(&e, &KeyConcepts::default());
        assert!(p.contains("EXPLICIT CONSTRAINTS:\n- (none)"));
    }
}
