use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Provider names the router knows how to construct
pub const KNOWN_PROVIDERS: &[&str] = &["anthropic", "openrouter", "openai"];

/// Default per-request timeout for HTTP providers, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default output token limit
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Where the effective configuration came from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    /// No file was found; built-in defaults only
    #[default]
    Defaults,
    /// Loaded from this file
    ConfigFile(PathBuf),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Defaults => write!(f, "defaults"),
            Self::ConfigFile(path) => write!(f, "config file ({})", path.display()),
        }
    }
}

/// Command-line overrides, applied last
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub provider: Option<String>,
    pub verbose: bool,
}

/// One provider table, e.g. `[llm.anthropic]`. Every field is optional and
/// falls back to the provider's built-in default.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout_secs: Option<u64>,
    pub budget: Option<u32>,
}

/// Fully resolved settings for one provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub name: String,
    pub api_key_env: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
    pub budget: Option<u32>,
}

/// `[llm]` section
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default = "default_fallback_providers")]
    pub fallback_providers: Vec<String>,
    pub anthropic: Option<ProviderConfig>,
    pub openrouter: Option<ProviderConfig>,
    pub openai: Option<ProviderConfig>,
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_fallback_providers() -> Vec<String> {
    vec!["anthropic".to_string(), "openrouter".to_string()]
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            fallback_providers: default_fallback_providers(),
            anthropic: None,
            openrouter: None,
            openai: None,
        }
    }
}

impl LlmConfig {
    /// Provider table for `name`, if one was written in the file
    #[must_use]
    pub fn provider_table(&self, name: &str) -> Option<&ProviderConfig> {
        match name {
            "anthropic" => self.anthropic.as_ref(),
            "openrouter" => self.openrouter.as_ref(),
            "openai" => self.openai.as_ref(),
            _ => None,
        }
    }

    /// Ordered fallback chain: the default provider, then the fallback list,
    /// without duplicates.
    #[must_use]
    pub fn chain(&self) -> Vec<String> {
        let mut chain: Vec<String> = Vec::new();
        let names = std::iter::once(&self.default_provider).chain(self.fallback_providers.iter());
        for name in names {
            let name = name.trim();
            if !name.is_empty() && !chain.iter().any(|c| c == name) {
                chain.push(name.to_string());
            }
        }
        chain
    }

    /// Resolve the settings for a known provider, filling unset fields with
    /// built-in defaults. Returns `None` for unknown names.
    #[must_use]
    pub fn settings_for(&self, name: &str) -> Option<ProviderSettings> {
        let (api_key_env, base_url, model) = match name {
            "anthropic" => (
                "ANTHROPIC_API_KEY",
                "https://api.anthropic.com/v1/messages",
                "claude-sonnet-4-5",
            ),
            "openrouter" => (
                "OPENROUTER_API_KEY",
                "https://openrouter.ai/api/v1/chat/completions",
                "anthropic/claude-sonnet-4.5",
            ),
            "openai" => (
                "OPENAI_API_KEY",
                "https://api.openai.com/v1/chat/completions",
                "gpt-4o",
            ),
            _ => return None,
        };
        let table = self.provider_table(name).cloned().unwrap_or_default();

        Some(ProviderSettings {
            name: name.to_string(),
            api_key_env: table.api_key_env.unwrap_or_else(|| api_key_env.to_string()),
            base_url: table.base_url.unwrap_or_else(|| base_url.to_string()),
            model: table.model.unwrap_or_else(|| model.to_string()),
            max_tokens: table.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: table.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            timeout: Duration::from_secs(table.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            budget: table.budget,
        })
    }
}

/// `[clarifier]` section
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClarifierConfig {
    /// Descriptions shorter than this are flagged
    pub min_description_chars: usize,
    /// Hedge terms flagged when found in a description
    pub vague_terms: Vec<String>,
    /// Cap on points surfaced by the model-based check
    pub max_semantic_points: usize,
    pub min_sub_expectations: usize,
    pub max_sub_expectations: usize,
}

impl Default for ClarifierConfig {
    fn default() -> Self {
        Self {
            min_description_chars: 10,
            vague_terms: [
                "etc.",
                "various",
                "some",
                "several",
                "and so on",
                "stuff",
                "things",
                "maybe",
                "as needed",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            max_semantic_points: 3,
            min_sub_expectations: 3,
            max_sub_expectations: 7,
        }
    }
}

/// `[generator]` section
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    /// Stream code generation and surface fenced blocks as they complete
    pub stream: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self { stream: true }
    }
}

/// Effective specsmith configuration.
///
/// Built with [`Config::discover`] for CLI-like behavior, or constructed
/// directly (e.g. `Config::default()`) when embedding.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub llm: LlmConfig,
    pub clarifier: ClarifierConfig,
    pub generator: GeneratorConfig,
    pub source: ConfigSource,
}

impl Config {
    /// Resolved settings for every provider in the chain, in order.
    /// Unknown names are skipped; validation reports them.
    #[must_use]
    pub fn provider_chain(&self) -> Vec<ProviderSettings> {
        self.llm
            .chain()
            .iter()
            .filter_map(|name| self.llm.settings_for(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_deduplicates_default_provider() {
        let llm = LlmConfig::default();
        assert_eq!(llm.chain(), vec!["anthropic", "openrouter"]);
    }

    #[test]
    fn test_chain_puts_default_first() {
        let llm = LlmConfig {
            default_provider: "openai".to_string(),
            fallback_providers: vec!["anthropic".to_string(), "openai".to_string()],
            ..LlmConfig::default()
        };
        assert_eq!(llm.chain(), vec!["openai", "anthropic"]);
    }

    #[test]
    fn test_settings_fall_back_to_builtin_defaults() {
        let llm = LlmConfig {
            openrouter: Some(ProviderConfig {
                model: Some("meta-llama/llama-3-70b".to_string()),
                budget: Some(5),
                ..ProviderConfig::default()
            }),
            ..LlmConfig::default()
        };

        let settings = llm.settings_for("openrouter").unwrap();
        assert_eq!(settings.model, "meta-llama/llama-3-70b");
        assert_eq!(settings.api_key_env, "OPENROUTER_API_KEY");
        assert_eq!(settings.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(settings.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(settings.budget, Some(5));

        assert!(llm.settings_for("gemini").is_none());
    }

    #[test]
    fn test_clarifier_defaults() {
        let c = ClarifierConfig::default();
        assert_eq!(c.min_description_chars, 10);
        assert_eq!(c.max_semantic_points, 3);
        assert_eq!((c.min_sub_expectations, c.max_sub_expectations), (3, 7));
        assert!(c.vague_terms.iter().any(|t| t == "etc."));
    }
}
