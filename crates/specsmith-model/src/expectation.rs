use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Names that count as "no name given"
const DEFAULT_NAMES: &[&str] = &["", "unnamed", "untitled", "new expectation", "n/a", "tbd"];

/// Whether a name is missing or one of the placeholder values
#[must_use]
pub fn is_default_name(name: &str) -> bool {
    let normalized = name.trim().to_lowercase();
    DEFAULT_NAMES.contains(&normalized.as_str())
}

/// Position of an expectation in the decomposition tree
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExpectationLevel {
    #[default]
    Top,
    Sub,
}

/// Structured semantic description of desired software.
///
/// Every field defaults when absent so partially filled model output still
/// deserializes; the clarifier assigns `id` and `level` itself.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Expectation {
    pub id: String,
    #[serde(alias = "title")]
    pub name: String,
    pub description: String,
    #[serde(alias = "criteria", alias = "acceptanceCriteria")]
    pub acceptance_criteria: Vec<String>,
    pub constraints: Vec<String>,
    pub level: ExpectationLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
}

impl Expectation {
    /// Keys that carry requirement content in model output, aliases included
    pub const CONTENT_FIELDS: &'static [&'static str] = &[
        "name",
        "title",
        "description",
        "acceptance_criteria",
        "criteria",
        "acceptanceCriteria",
        "constraints",
    ];

    /// New top-level expectation with a fresh id
    pub fn new_top(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    /// New sub-expectation of `parent` with a fresh id
    pub fn new_sub(
        parent: &Expectation,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            level: ExpectationLevel::Sub,
            parent_id: Some(parent.id.clone()),
            ..Self::default()
        }
    }

    pub fn with_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.acceptance_criteria = criteria.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_constraints<I, S>(mut self, constraints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constraints = constraints.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source_text(mut self, text: impl Into<String>) -> Self {
        self.source_text = Some(text.into());
        self
    }

    #[must_use]
    pub fn is_sub(&self) -> bool {
        self.level == ExpectationLevel::Sub
    }
}

/// Structured finding explaining why a draft is not final yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncertaintyPoint {
    /// Expectation field the point is about, e.g. `acceptance_criteria`
    #[serde(default)]
    pub field: String,
    /// Short issue tag, e.g. `missing`, `too_short`, `vague`
    #[serde(default)]
    pub issue: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

impl UncertaintyPoint {
    pub fn new(
        field: impl Into<String>,
        issue: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            issue: issue.into(),
            message: message.into(),
            question: None,
        }
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = Some(question.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        assert!(is_default_name(""));
        assert!(is_default_name("  Unnamed "));
        assert!(is_default_name("Untitled"));
        assert!(!is_default_name("Todo App"));
    }

    #[test]
    fn test_sub_links_to_parent() {
        let top = Expectation::new_top("Todo App", "Manage personal tasks");
        let sub = Expectation::new_sub(&top, "Storage", "Persist tasks");
        assert!(sub.is_sub());
        assert_eq!(sub.parent_id.as_deref(), Some(top.id.as_str()));
        assert_ne!(sub.id, top.id);
    }

    #[test]
    fn test_partial_document_deserializes() {
        let exp: Expectation = serde_yaml::from_str("name: Todo App\ncriteria:\n  - add tasks\n")
            .unwrap();
        assert_eq!(exp.name, "Todo App");
        assert_eq!(exp.acceptance_criteria, vec!["add tasks"]);
        assert!(exp.description.is_empty());
        assert_eq!(exp.level, ExpectationLevel::Top);
    }

    #[test]
    fn test_level_serializes_lowercase() {
        let json = serde_json::to_string(&ExpectationLevel::Sub).unwrap();
        assert_eq!(json, "\"sub\"");
        assert_eq!(ExpectationLevel::Top.to_string(), "top");
    }
}
