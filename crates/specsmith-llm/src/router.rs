//! Provider Router: ordered fallback across interchangeable backends
//!
//! The router holds every constructed provider with its defaults, tries the
//! chain in order until one succeeds, keeps cumulative per-provider usage and
//! a history of every attempted request.

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use specsmith_config::{
    Config, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TIMEOUT_SECS, ProviderSettings,
};
use specsmith_model::{RecordStore, RecordStoreError, RequestRecord};

use crate::LlmError;
use crate::construct_backend;
use crate::http_client::redact_error_message;
use crate::types::{LlmBackend, LlmInvocation, LlmResult, Message};

/// Purpose recorded when the caller does not name one
pub const DEFAULT_PURPOSE: &str = "generate";

/// Per-provider defaults, overridable per call through [`GenerateOptions`]
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDefaults {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl ProviderDefaults {
    /// Defaults for `model` with the configuration-wide sampling settings
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl From<&ProviderSettings> for ProviderDefaults {
    fn from(settings: &ProviderSettings) -> Self {
        Self {
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            timeout: settings.timeout,
        }
    }
}

/// Per-call overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateOptions {
    /// Provider to try first instead of the configured default
    pub provider: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// System prompt sent ahead of the user prompt
    pub system: Option<String>,
    /// Why the call is made; shows up in logs and request history
    pub purpose: Option<String>,
}

impl GenerateOptions {
    pub fn for_purpose(purpose: impl Into<String>) -> Self {
        Self {
            purpose: Some(purpose.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Cumulative counters for one provider. Only successful responses count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProviderUsage {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

struct ProviderEntry {
    name: String,
    backend: Arc<dyn LlmBackend>,
    defaults: ProviderDefaults,
}

pub struct ProviderRouter {
    entries: Vec<ProviderEntry>,
    default_provider: String,
    fallback_order: Vec<String>,
    usage: Mutex<HashMap<String, ProviderUsage>>,
    history: Mutex<Vec<RequestRecord>>,
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRouter")
            .field("providers", &self.providers())
            .field("default_provider", &self.default_provider)
            .field("fallback_order", &self.fallback_order)
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ProviderRouter {
    /// Empty router; add providers with [`ProviderRouter::with_provider`]
    pub fn new(default_provider: impl Into<String>, fallback_order: Vec<String>) -> Self {
        Self {
            entries: Vec::new(),
            default_provider: default_provider.into(),
            fallback_order,
            usage: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Register a provider. Registering a name twice replaces the earlier one.
    #[must_use]
    pub fn with_provider(
        mut self,
        name: impl Into<String>,
        backend: Arc<dyn LlmBackend>,
        defaults: ProviderDefaults,
    ) -> Self {
        let name = name.into();
        self.entries.retain(|e| e.name != name);
        self.entries.push(ProviderEntry {
            name,
            backend,
            defaults,
        });
        self
    }

    /// Build a router from configuration, reading API keys from the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::Misconfiguration` if no provider in the chain could
    /// be constructed.
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        Self::from_config_with_env(config, |key| std::env::var(key).ok())
    }

    /// [`ProviderRouter::from_config`] with an explicit environment lookup.
    ///
    /// A provider that cannot be constructed (unknown name, missing API key)
    /// is skipped with a warning.
    pub fn from_config_with_env<F>(config: &Config, env: F) -> Result<Self, LlmError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut router = Self::new(
            config.llm.default_provider.clone(),
            config.llm.fallback_providers.clone(),
        );
        let mut skipped = Vec::new();

        for name in config.llm.chain() {
            let Some(settings) = config.llm.settings_for(&name) else {
                warn!(provider = %name, "Skipping unknown provider");
                skipped.push(format!("{name}: unknown provider"));
                continue;
            };
            match construct_backend(&settings, &env) {
                Ok(backend) => {
                    debug!(provider = %name, model = %settings.model, "Provider constructed");
                    let defaults = ProviderDefaults::from(&settings);
                    router = router.with_provider(name, backend, defaults);
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "Skipping provider that could not be constructed");
                    skipped.push(format!("{name}: {e}"));
                }
            }
        }

        if router.entries.is_empty() {
            return Err(LlmError::Misconfiguration(format!(
                "no provider could be constructed ({})",
                skipped.join("; ")
            )));
        }
        Ok(router)
    }

    /// Registered provider names, in registration order
    #[must_use]
    pub fn providers(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Names of the providers a call would try, in order
    #[must_use]
    pub fn chain_names(&self, preferred: Option<&str>) -> Vec<String> {
        self.chain(preferred).iter().map(|e| e.name.clone()).collect()
    }

    /// Preferred provider, then the default, then the fallback list.
    /// Duplicates and names with no registered backend are dropped.
    fn chain(&self, preferred: Option<&str>) -> Vec<&ProviderEntry> {
        let names = preferred
            .into_iter()
            .chain(std::iter::once(self.default_provider.as_str()))
            .chain(self.fallback_order.iter().map(String::as_str));
        let mut chain: Vec<&ProviderEntry> = Vec::new();
        for name in names {
            if chain.iter().any(|e| e.name == name) {
                continue;
            }
            match self.entries.iter().find(|e| e.name == name) {
                Some(entry) => chain.push(entry),
                None => debug!(provider = name, "Provider not registered, skipping"),
            }
        }
        chain
    }

    fn invocation(
        entry: &ProviderEntry,
        prompt: &str,
        options: &GenerateOptions,
        purpose: &str,
    ) -> LlmInvocation {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = options.system.as_deref().filter(|s| !s.is_empty()) {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));

        let model = options
            .model
            .clone()
            .unwrap_or_else(|| entry.defaults.model.clone());
        let temperature = options.temperature.unwrap_or(entry.defaults.temperature);
        let max_tokens = options.max_tokens.unwrap_or(entry.defaults.max_tokens);

        LlmInvocation::new(purpose, model, entry.defaults.timeout, messages)
            .with_metadata("temperature", serde_json::json!(temperature))
            .with_metadata("max_tokens", serde_json::json!(max_tokens))
    }

    /// Generate a completion, trying each provider of the chain in order.
    ///
    /// The first success wins and is returned immediately.
    ///
    /// # Errors
    ///
    /// `LlmError::FallbackExhausted` when every provider failed, carrying the
    /// attempted names and the last failure; `LlmError::NoProviders` when the
    /// chain is empty.
    pub async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<LlmResult, LlmError> {
        self.route(prompt, options, None).await
    }

    /// Like [`ProviderRouter::generate`], forwarding text deltas to `chunks`.
    ///
    /// Chunks already delivered by a provider that then fails are not
    /// retracted; the next provider streams its own answer from the start.
    pub async fn generate_streaming(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        chunks: &UnboundedSender<String>,
    ) -> Result<LlmResult, LlmError> {
        self.route(prompt, options, Some(chunks)).await
    }

    async fn route(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        chunks: Option<&UnboundedSender<String>>,
    ) -> Result<LlmResult, LlmError> {
        let purpose = options.purpose.as_deref().unwrap_or(DEFAULT_PURPOSE);
        if let Some(preferred) = options.provider.as_deref()
            && !self.entries.iter().any(|e| e.name == preferred)
        {
            warn!(provider = preferred, purpose, "Requested provider is not registered");
        }

        let chain = self.chain(options.provider.as_deref());
        if chain.is_empty() {
            return Err(LlmError::NoProviders);
        }

        let mut attempted = Vec::with_capacity(chain.len());
        let mut last_error: Option<LlmError> = None;

        for entry in chain {
            if let Some(previous) = attempted.last() {
                info!(
                    from = %previous,
                    to = %entry.name,
                    purpose,
                    "Falling back to next provider"
                );
            }
            attempted.push(entry.name.clone());

            let inv = Self::invocation(entry, prompt, options, purpose);
            let model = inv.model.clone();
            let prompt_chars = inv.prompt_chars();
            let started = Instant::now();

            let outcome = match chunks {
                Some(tx) => entry.backend.invoke_streaming(inv, tx).await,
                None => entry.backend.invoke(inv).await,
            };
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let mut record = RequestRecord {
                timestamp: Utc::now(),
                provider: entry.name.clone(),
                model,
                purpose: purpose.to_string(),
                prompt_chars,
                success: false,
                error: None,
                tokens_input: None,
                tokens_output: None,
                duration_ms,
            };

            match outcome {
                Ok(result) => {
                    debug!(
                        provider = %entry.name,
                        purpose,
                        duration_ms,
                        tokens_input = ?result.tokens_input,
                        tokens_output = ?result.tokens_output,
                        "Provider succeeded"
                    );
                    {
                        let mut usage = lock(&self.usage);
                        let counters = usage.entry(entry.name.clone()).or_default();
                        counters.requests += 1;
                        counters.input_tokens += result.tokens_input.unwrap_or(0);
                        counters.output_tokens += result.tokens_output.unwrap_or(0);
                    }
                    record.success = true;
                    record.model = result.model_used.clone();
                    record.tokens_input = result.tokens_input;
                    record.tokens_output = result.tokens_output;
                    lock(&self.history).push(record);
                    return Ok(result);
                }
                Err(e) => {
                    let message = redact_error_message(&e.to_string());
                    warn!(
                        provider = %entry.name,
                        purpose,
                        duration_ms,
                        error = %message,
                        "Provider failed"
                    );
                    record.error = Some(message);
                    lock(&self.history).push(record);
                    last_error = Some(e);
                }
            }
        }

        Err(LlmError::FallbackExhausted {
            attempted,
            last_error: last_error
                .map(|e| redact_error_message(&e.to_string()))
                .unwrap_or_default(),
        })
    }

    /// Usage snapshot for every registered provider, zero for unused ones
    #[must_use]
    pub fn usage(&self) -> BTreeMap<String, ProviderUsage> {
        let usage = lock(&self.usage);
        self.entries
            .iter()
            .map(|e| (e.name.clone(), usage.get(&e.name).copied().unwrap_or_default()))
            .collect()
    }

    /// Take the request history accumulated so far, leaving it empty
    pub fn drain_history(&self) -> Vec<RequestRecord> {
        std::mem::take(&mut *lock(&self.history))
    }

    /// Push the drained history to `store`. On failure the entries are put
    /// back ahead of anything recorded meanwhile.
    pub async fn sync_history(&self, store: &dyn RecordStore) -> Result<usize, RecordStoreError> {
        let entries = self.drain_history();
        if entries.is_empty() {
            return Ok(0);
        }
        match store.record_requests(&entries).await {
            Ok(()) => Ok(entries.len()),
            Err(e) => {
                let mut history = lock(&self.history);
                let newer = std::mem::replace(&mut *history, entries);
                history.extend(newer);
                Err(e)
            }
        }
    }
}
