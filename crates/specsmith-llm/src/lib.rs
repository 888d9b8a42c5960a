//! LLM backend abstraction and the Provider Router
//!
//! Every provider implements [`LlmBackend`]. The [`ProviderRouter`] holds the
//! configured providers and tries them in fallback order until one succeeds.

mod anthropic_backend;
mod budgeted_backend;
mod http_client;
mod openai_backend;
mod router;
mod sse;
mod types;

#[cfg(any(test, feature = "test-utils"))]
mod scripted;

use std::sync::Arc;

pub use budgeted_backend::{BudgetedBackend, budget_env_var, resolve_budget};
pub use router::{
    DEFAULT_PURPOSE, GenerateOptions, ProviderDefaults, ProviderRouter, ProviderUsage,
};
#[cfg(any(test, feature = "test-utils"))]
pub use scripted::ScriptedBackend;
pub use specsmith_utils::error::LlmError;
pub use types::{LlmBackend, LlmInvocation, LlmResult, Message, Role};

use anthropic_backend::AnthropicBackend;
use openai_backend::OpenAiCompatibleBackend;
use specsmith_config::ProviderSettings;

/// Construct the backend for one provider, wrapped in a [`BudgetedBackend`]
/// when a budget applies.
///
/// # Errors
///
/// Returns `LlmError::Misconfiguration` if the API key variable is unset or
/// the HTTP client cannot be built, `LlmError::Unsupported` for an unknown
/// provider name.
pub(crate) fn construct_backend<F>(
    settings: &ProviderSettings,
    env: &F,
) -> Result<Arc<dyn LlmBackend>, LlmError>
where
    F: Fn(&str) -> Option<String>,
{
    let api_key = env(&settings.api_key_env)
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            LlmError::Misconfiguration(format!(
                "API key not found in environment variable '{}'. \
                 Set it or configure a different api_key_env in [llm.{}].",
                settings.api_key_env, settings.name
            ))
        })?;

    let backend: Box<dyn LlmBackend> = match settings.name.as_str() {
        "anthropic" => Box::new(AnthropicBackend::new(api_key, settings)?),
        "openrouter" | "openai" => Box::new(OpenAiCompatibleBackend::new(api_key, settings)?),
        other => {
            return Err(LlmError::Unsupported(format!(
                "Provider '{other}' is not supported"
            )));
        }
    };

    Ok(match resolve_budget(&settings.name, settings.budget, env) {
        Some(limit) => Arc::new(BudgetedBackend::new(backend, limit)),
        None => Arc::from(backend),
    })
}
