use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// First fenced block tagged as YAML/JSON, or untagged
static DATA_FENCE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)```(?:ya?ml|json)?[ \t]*\r?\n(.*?)```").ok());

/// Outcome of the parser chain
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed<T> {
    /// The text was a well-formed YAML or JSON document
    Strict(T),
    /// Recovered from `key: value` lines and bullet lists
    Heuristic(T),
    /// Nothing usable; the raw text is kept for diagnostics
    Unparsed { raw: String, reason: String },
}

impl<T> Parsed<T> {
    /// The parsed value, if any stage succeeded
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Strict(v) | Self::Heuristic(v) => Some(v),
            Self::Unparsed { .. } => None,
        }
    }

    #[must_use]
    pub fn is_parsed(&self) -> bool {
        !matches!(self, Self::Unparsed { .. })
    }

    /// Stage name for logging
    #[must_use]
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Strict(_) => "strict",
            Self::Heuristic(_) => "heuristic",
            Self::Unparsed { .. } => "unparsed",
        }
    }
}

/// Remove a surrounding YAML/JSON code fence, if the text has one
#[must_use]
pub fn strip_fences(text: &str) -> &str {
    if let Some(re) = DATA_FENCE.as_ref()
        && let Some(caps) = re.captures(text)
        && let Some(body) = caps.get(1)
    {
        return body.as_str().trim();
    }
    text.trim()
}

/// Parse model output into `T`, never failing.
///
/// Stages, in order: JSON (when the body looks like JSON), YAML, then the
/// line heuristic of [`heuristic_value`].
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Parsed<T> {
    parse_chain(text, None)
}

/// [`parse_structured`] for targets whose fields all default.
///
/// Prose such as `Sure: here it is` is valid YAML and would deserialize into
/// an all-default value. A stage only succeeds here when the document is a
/// mapping naming at least one of `fields`; otherwise the result is
/// [`Parsed::Unparsed`].
pub fn parse_expecting<T: DeserializeOwned>(text: &str, fields: &[&str]) -> Parsed<T> {
    parse_chain(text, Some(fields))
}

/// Whether `value` is a mapping with at least one key from `fields`
fn names_any(value: &Value, fields: &[&str]) -> bool {
    let Value::Object(map) = value else {
        return false;
    };
    map.keys().any(|key| {
        let normalized = normalize_key(key);
        fields.iter().any(|f| *f == key || *f == normalized)
    })
}

fn parse_chain<T: DeserializeOwned>(text: &str, fields: Option<&[&str]>) -> Parsed<T> {
    let body = strip_fences(text);
    if body.is_empty() {
        return Parsed::Unparsed {
            raw: text.to_string(),
            reason: "empty response".to_string(),
        };
    }
    let accepts = |value: &Value| fields.is_none_or(|f| names_any(value, f));

    if (body.starts_with('{') || body.starts_with('['))
        && let Ok(value) = serde_json::from_str::<Value>(body)
        && accepts(&value)
        && let Ok(parsed) = serde_json::from_value::<T>(value)
    {
        return Parsed::Strict(parsed);
    }

    let strict_error = match serde_yaml::from_str::<Value>(body) {
        Ok(value) if !accepts(&value) => "no expected field in document".to_string(),
        Ok(value) => match serde_json::from_value::<T>(value) {
            Ok(parsed) => return Parsed::Strict(parsed),
            Err(e) => e.to_string(),
        },
        Err(e) => e.to_string(),
    };
    tracing::debug!(error = %strict_error, "strict parse failed, trying line heuristic");

    let Some(value) = heuristic_value(body) else {
        return Parsed::Unparsed {
            raw: text.to_string(),
            reason: format!("no key/value lines found ({strict_error})"),
        };
    };
    if !accepts(&value) {
        return Parsed::Unparsed {
            raw: text.to_string(),
            reason: format!("no expected field among recovered keys ({strict_error})"),
        };
    }

    match serde_json::from_value::<T>(value) {
        Ok(parsed) => Parsed::Heuristic(parsed),
        Err(e) => Parsed::Unparsed {
            raw: text.to_string(),
            reason: format!("heuristic fields did not fit: {e}"),
        },
    }
}

/// Normalize a heading or label into a snake_case key
fn normalize_key(raw: &str) -> String {
    let cleaned = raw
        .trim()
        .trim_start_matches('#')
        .trim_matches(|c| c == '*' || c == '_' || c == '`')
        .trim();
    let mut key = String::with_capacity(cleaned.len());
    for c in cleaned.chars() {
        if c.is_alphanumeric() {
            key.extend(c.to_lowercase());
        } else if (c == ' ' || c == '-' || c == '_') && !key.ends_with('_') {
            key.push('_');
        }
    }
    key.trim_matches('_').to_string()
}

fn scalar(raw: &str) -> Value {
    let v = raw.trim().trim_matches('"');
    match v {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(v.to_string()),
    }
}

/// Strip a bullet or ordinal marker, returning the item text
fn list_item(line: &str) -> Option<&str> {
    let t = line.trim_start();
    if let Some(rest) = t.strip_prefix("- ").or_else(|| t.strip_prefix("* ")) {
        return Some(rest.trim());
    }
    let digits = t.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &t[digits..];
        if let Some(item) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(item.trim());
        }
    }
    None
}

/// Build a JSON object from loosely formatted text.
///
/// `key: value` lines become string fields (`true`/`false` become booleans),
/// a `key:` line with no value opens a list that following bullet or numbered
/// lines fill. Indented lines that are neither extend the last scalar.
/// Returns `None` when no key was recognized.
fn heuristic_value(text: &str) -> Option<Value> {
    let mut map = Map::new();
    let mut current_key: Option<String> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if let Some(item) = list_item(line) {
            let key = current_key.clone().unwrap_or_else(|| "items".to_string());
            let entry = map
                .entry(key.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !entry.is_array() {
                // a scalar followed by bullets becomes a list
                let previous = entry.take();
                *entry = Value::Array(vec![previous]);
            }
            if let Value::Array(items) = entry
                && !item.is_empty()
            {
                items.push(Value::String(item.to_string()));
            }
            current_key = Some(key);
            continue;
        }

        if let Some((raw_key, raw_value)) = line.split_once(':') {
            let key = normalize_key(raw_key);
            let looks_like_key = !key.is_empty()
                && !raw_key.starts_with(char::is_whitespace)
                && raw_key.split_whitespace().count() <= 4;
            if looks_like_key {
                let value = raw_value.trim();
                if value.is_empty() {
                    map.entry(key.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                } else {
                    map.insert(key.clone(), scalar(value));
                }
                current_key = Some(key);
                continue;
            }
        }

        // continuation of the previous scalar
        if let Some(key) = &current_key
            && let Some(Value::String(existing)) = map.get_mut(key)
        {
            existing.push(' ');
            existing.push_str(line.trim());
        }
    }

    // keys opened but never filled carry no information
    map.retain(|_, v| !matches!(v, Value::Array(items) if items.is_empty()));
    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq, Default)]
    #[serde(default)]
    struct Draft {
        name: String,
        description: String,
        acceptance_criteria: Vec<String>,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        valid: bool,
        #[serde(default)]
        issues: Vec<String>,
    }

    #[test]
    fn test_strict_yaml_inside_fence() {
        let text = "Here you go:\n```yaml\nname: Todo App\ndescription: Track tasks\nacceptance_criteria:\n  - add a task\n```\nThanks";
        let parsed: Parsed<Draft> = parse_structured(text);
        assert_eq!(parsed.stage(), "strict");
        let draft = parsed.into_option().unwrap();
        assert_eq!(draft.name, "Todo App");
        assert_eq!(draft.acceptance_criteria, vec!["add a task"]);
    }

    #[test]
    fn test_strict_json() {
        let parsed: Parsed<Verdict> = parse_structured(r#"{"valid": false, "issues": ["x"]}"#);
        assert_eq!(
            parsed,
            Parsed::Strict(Verdict {
                valid: false,
                issues: vec!["x".to_string()]
            })
        );
    }

    #[test]
    fn test_heuristic_markdown_labels() {
        let text = "**Name**: Todo App\n**Description**: A small app: tracks tasks\n\n## Acceptance Criteria:\n1. Users can add tasks\n2. Users can complete tasks\n";
        let parsed: Parsed<Draft> = parse_structured(text);
        assert_eq!(parsed.stage(), "heuristic");
        let draft = parsed.into_option().unwrap();
        assert_eq!(draft.name, "Todo App");
        assert_eq!(draft.description, "A small app: tracks tasks");
        assert_eq!(
            draft.acceptance_criteria,
            vec!["Users can add tasks", "Users can complete tasks"]
        );
    }

    #[test]
    fn test_heuristic_boolean_field() {
        let text = "Valid: false\nIssues:\n- missing error handling\n- unused import";
        let verdict = parse_structured::<Verdict>(text).into_option().unwrap();
        assert!(!verdict.valid);
        assert_eq!(verdict.issues.len(), 2);
    }

    #[test]
    fn test_prose_is_unparsed() {
        let parsed: Parsed<Verdict> =
            parse_structured("I could not review this code, sorry about that.");
        match parsed {
            Parsed::Unparsed { raw, .. } => assert!(raw.starts_with("I could not")),
            other => panic!("expected Unparsed, got {other:?}"),
        }
    }

    #[test]
    fn test_prose_with_colon_is_unparsed_when_fields_expected() {
        const FIELDS: &[&str] = &["name", "description", "acceptance_criteria"];
        let parsed: Parsed<Draft> = parse_expecting("Sure: I can help you build that.", FIELDS);
        match parsed {
            Parsed::Unparsed { raw, reason } => {
                assert_eq!(raw, "Sure: I can help you build that.");
                assert!(reason.contains("no expected field"));
            }
            other => panic!("expected Unparsed, got {other:?}"),
        }

        // without expected fields the same prose yields an empty value
        let loose: Parsed<Draft> = parse_structured("Sure: I can help you build that.");
        assert_eq!(loose, Parsed::Strict(Draft::default()));
    }

    #[test]
    fn test_expected_fields_accept_strict_and_heuristic() {
        const FIELDS: &[&str] = &["name", "description", "acceptance_criteria"];
        let strict: Parsed<Draft> = parse_expecting("name: Todo App\nnote: extra\n", FIELDS);
        assert_eq!(strict.stage(), "strict");

        let text = "**Name**: Todo App\n**Description**: A small app: tracks tasks\n";
        let heuristic: Parsed<Draft> = parse_expecting(text, FIELDS);
        assert_eq!(heuristic.stage(), "heuristic");
        assert_eq!(heuristic.into_option().unwrap().name, "Todo App");
    }

    #[test]
    fn test_empty_is_unparsed() {
        assert!(!parse_structured::<Draft>("   ").is_parsed());
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("## Acceptance Criteria"), "acceptance_criteria");
        assert_eq!(normalize_key("**Key-Concepts**"), "key_concepts");
    }
}
