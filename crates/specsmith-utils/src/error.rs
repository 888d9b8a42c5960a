use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Trait for providing user-friendly error reporting with context and suggestions
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping similar errors
    fn category(&self) -> ErrorCategory;

    /// Render message, context and suggestions as one block for terminal output
    fn display_for_user(&self) -> String {
        let mut out = format!("error: {}", self.user_message());
        if let Some(context) = self.context() {
            out.push_str("\n\n");
            out.push_str(&context);
        }
        let suggestions = self.suggestions();
        if !suggestions.is_empty() {
            out.push_str("\n\nSuggestions:");
            for suggestion in suggestions {
                out.push_str("\n  - ");
                out.push_str(&suggestion);
            }
        }
        out
    }
}

/// Categories of errors for better organization and handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    ProviderIntegration,
    ResourceLimits,
    Execution,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::ProviderIntegration => write!(f, "Provider Integration"),
            Self::ResourceLimits => write!(f, "Resource Limits"),
            Self::Execution => write!(f, "Execution"),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file {path}: {reason}")]
    InvalidFile { path: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidFile { path, reason } => {
                format!("Configuration file '{path}' could not be parsed: {reason}")
            }
            Self::MissingRequired(key) => format!("Required configuration '{key}' is missing"),
            Self::InvalidValue { key, value } => format!("Invalid value for '{key}': {value}"),
            Self::NotFound { path } => format!("Configuration file not found: {path}"),
        }
    }

    fn context(&self) -> Option<String> {
        Some(
            "Configuration is read from --config, .specsmith/config.toml or the user config directory."
                .to_string(),
        )
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidFile { .. } => vec![
                "Check the TOML syntax of the configuration file".to_string(),
                "Compare section names against [llm], [clarifier] and [generator]".to_string(),
            ],
            Self::MissingRequired(_) | Self::InvalidValue { .. } => vec![
                "Review the [llm] section: every provider in the chain needs a [llm.<name>] table"
                    .to_string(),
            ],
            Self::NotFound { .. } => {
                vec!["Pass an existing file to --config or omit the flag".to_string()]
            }
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

/// Errors produced by text-generation backends and the provider router
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// Transport-level failure (HTTP connectivity, malformed response body)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider authentication failure (401, 403, missing API key)
    #[error("Provider authentication error: {0}")]
    ProviderAuth(String),

    /// Provider quota/rate limit exceeded (429)
    #[error("Provider quota exceeded: {0}")]
    ProviderQuota(String),

    /// Provider service outage (5xx errors)
    #[error("Provider outage: {0}")]
    ProviderOutage(String),

    /// Invocation timed out
    #[error("Timeout after {duration:?}")]
    Timeout { duration: Duration },

    /// Budget limit exceeded
    #[error("Budget exceeded: attempted {attempted} calls, limit is {limit}")]
    BudgetExceeded { limit: u32, attempted: u32 },

    /// Configuration error
    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),

    /// Unsupported feature or provider
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Every provider in the fallback chain failed
    #[error("All providers failed (tried: {}): {last_error}", attempted.join(", "))]
    FallbackExhausted {
        attempted: Vec<String>,
        last_error: String,
    },

    /// The fallback chain resolved to no usable provider
    #[error("No providers available in the fallback chain")]
    NoProviders,
}

impl UserFriendlyError for LlmError {
    fn user_message(&self) -> String {
        match self {
            Self::Transport(msg) => format!("LLM transport error: {msg}"),
            Self::ProviderAuth(msg) => format!("LLM provider authentication failed: {msg}"),
            Self::ProviderQuota(msg) => format!("LLM provider quota exceeded: {msg}"),
            Self::ProviderOutage(msg) => format!("LLM provider service outage: {msg}"),
            Self::Timeout { duration } => {
                format!("LLM invocation timed out after {:?}", duration)
            }
            Self::BudgetExceeded { limit, attempted } => format!(
                "LLM budget exceeded: attempted {} calls, limit is {}",
                attempted, limit
            ),
            Self::Misconfiguration(msg) => format!("LLM configuration error: {msg}"),
            Self::Unsupported(msg) => format!("LLM feature not supported: {msg}"),
            Self::FallbackExhausted {
                attempted,
                last_error,
            } => format!(
                "Every provider failed ({}); last error: {last_error}",
                attempted.join(", ")
            ),
            Self::NoProviders => "No LLM provider could be used".to_string(),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Transport(_) => Some(
                "Transport errors occur when the LLM backend cannot be reached or returns an unreadable body."
                    .to_string(),
            ),
            Self::ProviderAuth(_) => Some(
                "Authentication errors indicate missing or invalid API keys or credentials."
                    .to_string(),
            ),
            Self::ProviderQuota(_) => Some(
                "Quota errors occur when rate limits or usage limits are exceeded.".to_string(),
            ),
            Self::ProviderOutage(_) => {
                Some("Provider outages are temporary service disruptions.".to_string())
            }
            Self::Timeout { .. } => Some(
                "Timeouts occur when a provider takes longer than its configured limit."
                    .to_string(),
            ),
            Self::BudgetExceeded { .. } => {
                Some("Budget limits prevent excessive LLM API calls and costs.".to_string())
            }
            Self::Misconfiguration(_) | Self::Unsupported(_) => Some(
                "Configuration errors indicate missing or invalid LLM provider settings."
                    .to_string(),
            ),
            Self::FallbackExhausted { .. } | Self::NoProviders => Some(
                "The router tries each provider of the fallback chain in order and stops at the first success."
                    .to_string(),
            ),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Transport(_) => vec![
                "Verify network connectivity to the provider".to_string(),
                "Try running with --verbose to see detailed error information".to_string(),
            ],
            Self::ProviderAuth(_) => vec![
                "Check that the required API key environment variable is set".to_string(),
                "Verify the API key is valid and not expired".to_string(),
            ],
            Self::ProviderQuota(_) | Self::ProviderOutage(_) => vec![
                "Wait a few minutes and try again".to_string(),
                "Add another provider to [llm] fallback_providers".to_string(),
            ],
            Self::Timeout { .. } => vec![
                "Increase timeout_secs for the provider in configuration".to_string(),
                "Check your internet connection".to_string(),
            ],
            Self::BudgetExceeded { .. } => vec![
                "Raise the provider budget in configuration or via SPECSMITH_<PROVIDER>_BUDGET"
                    .to_string(),
            ],
            Self::Misconfiguration(_) | Self::Unsupported(_) | Self::NoProviders => vec![
                "Check the [llm] section of .specsmith/config.toml".to_string(),
                "Run `specsmith providers` to print the resolved fallback chain".to_string(),
            ],
            Self::FallbackExhausted { .. } => vec![
                "Run with --verbose to see why each provider failed".to_string(),
                "Add another provider to [llm] fallback_providers".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport(_) | Self::ProviderOutage(_) | Self::FallbackExhausted { .. } => {
                ErrorCategory::ProviderIntegration
            }
            Self::ProviderAuth(_)
            | Self::Misconfiguration(_)
            | Self::Unsupported(_)
            | Self::NoProviders => ErrorCategory::Configuration,
            Self::ProviderQuota(_) | Self::BudgetExceeded { .. } => ErrorCategory::ResourceLimits,
            Self::Timeout { .. } => ErrorCategory::Execution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::Transport("Connection failed".to_string());
        assert_eq!(err.to_string(), "Transport error: Connection failed");

        let err = LlmError::BudgetExceeded {
            limit: 2,
            attempted: 3,
        };
        assert_eq!(
            err.to_string(),
            "Budget exceeded: attempted 3 calls, limit is 2"
        );
    }

    #[test]
    fn test_fallback_exhausted_carries_last_error() {
        let err = LlmError::FallbackExhausted {
            attempted: vec!["anthropic".to_string(), "openrouter".to_string()],
            last_error: "Provider outage: 503".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("anthropic, openrouter"));
        assert!(rendered.ends_with("Provider outage: 503"));
        assert_eq!(err.category(), ErrorCategory::ProviderIntegration);
    }

    #[test]
    fn test_display_for_user_lists_suggestions() {
        let err = LlmError::ProviderAuth("missing key".to_string());
        let text = err.display_for_user();
        assert!(text.starts_with("error: LLM provider authentication failed"));
        assert!(text.contains("Suggestions:"));
        assert!(text.contains("API key"));
    }

    #[test]
    fn test_config_error_category() {
        let err = ConfigError::InvalidValue {
            key: "llm.default_provider".to_string(),
            value: "nope".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.user_message().contains("llm.default_provider"));
    }
}
