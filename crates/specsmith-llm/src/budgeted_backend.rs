//! Budgeted backend wrapper for LLM call limiting
//!
//! Wraps any `LlmBackend` and caps the number of invocations per process.
//! Once the cap is hit every call fails with `LlmError::BudgetExceeded`,
//! which the router treats like any other provider failure.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::LlmError;
use crate::types::{LlmBackend, LlmInvocation, LlmResult};

/// Environment variable carrying the budget override for `provider`,
/// e.g. `SPECSMITH_OPENROUTER_BUDGET`
#[must_use]
pub fn budget_env_var(provider: &str) -> String {
    format!(
        "SPECSMITH_{}_BUDGET",
        provider.to_uppercase().replace(['-', '.'], "_")
    )
}

/// Resolve the call budget for a provider
///
/// Precedence (highest to lowest):
/// 1. Environment variable (`SPECSMITH_<PROVIDER>_BUDGET`)
/// 2. Config file (`[llm.<provider>] budget`)
/// 3. Unlimited (`None`)
///
/// An unparsable environment value is ignored with a warning.
pub fn resolve_budget<F>(provider: &str, config_budget: Option<u32>, env: F) -> Option<u32>
where
    F: Fn(&str) -> Option<String>,
{
    let var = budget_env_var(provider);
    if let Some(raw) = env(&var) {
        match raw.trim().parse::<u32>() {
            Ok(limit) => {
                debug!(provider, limit, "Using budget limit from environment variable {}", var);
                return Some(limit);
            }
            Err(_) => warn!(provider, value = %raw, "Ignoring invalid {}", var),
        }
    }
    if let Some(limit) = config_budget {
        debug!(provider, limit, "Using budget limit from config file");
    }
    config_budget
}

/// A wrapper around an `LlmBackend` that enforces a budget limit on invocations.
///
/// The budget tracks attempted calls, not successful requests: a failed call
/// still consumes its slot, so retry loops cannot bypass the limit.
pub struct BudgetedBackend {
    inner: Box<dyn LlmBackend>,
    calls: AtomicU32,
    limit: u32,
}

impl BudgetedBackend {
    pub fn new(inner: Box<dyn LlmBackend>, limit: u32) -> Self {
        debug!(limit, "Creating BudgetedBackend");
        Self {
            inner,
            calls: AtomicU32::new(0),
            limit,
        }
    }

    /// Number of attempted calls so far
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Take a budget slot, failing once the limit is reached
    fn reserve(&self) -> Result<u32, LlmError> {
        let current = self.calls.fetch_add(1, Ordering::SeqCst);
        if current >= self.limit {
            let attempted = current + 1;
            warn!(limit = self.limit, attempted, "Budget limit exceeded");
            return Err(LlmError::BudgetExceeded {
                limit: self.limit,
                attempted,
            });
        }
        debug!(
            call_count = current + 1,
            limit = self.limit,
            "Budget check passed"
        );
        Ok(current + 1)
    }
}

#[async_trait]
impl LlmBackend for BudgetedBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
        let call = self.reserve()?;
        let result = self.inner.invoke(inv).await;
        if let Err(e) = &result {
            debug!(
                call_count = call,
                limit = self.limit,
                error = %e,
                "Inner backend failed (budget slot still consumed)"
            );
        }
        result
    }

    async fn invoke_streaming(
        &self,
        inv: LlmInvocation,
        chunks: &UnboundedSender<String>,
    ) -> Result<LlmResult, LlmError> {
        self.reserve()?;
        self.inner.invoke_streaming(inv, chunks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    struct MockBackend {
        should_fail: bool,
    }

    #[async_trait]
    impl LlmBackend for MockBackend {
        async fn invoke(&self, _inv: LlmInvocation) -> Result<LlmResult, LlmError> {
            if self.should_fail {
                Err(LlmError::Transport("mock failure".to_string()))
            } else {
                Ok(LlmResult::new("ok", "mock", "mock-model"))
            }
        }
    }

    fn invocation() -> LlmInvocation {
        LlmInvocation::new("test", "m", Duration::from_secs(1), vec![])
    }

    #[test]
    fn test_budget_env_var_name() {
        assert_eq!(budget_env_var("openrouter"), "SPECSMITH_OPENROUTER_BUDGET");
        assert_eq!(budget_env_var("my-proxy"), "SPECSMITH_MY_PROXY_BUDGET");
    }

    #[test]
    fn test_budget_precedence() {
        let env = HashMap::from([("SPECSMITH_OPENAI_BUDGET", "5")]);
        let lookup = |k: &str| env.get(k).map(|v| v.to_string());

        assert_eq!(resolve_budget("openai", Some(50), lookup), Some(5));
        assert_eq!(resolve_budget("anthropic", Some(50), lookup), Some(50));
        assert_eq!(resolve_budget("anthropic", None, lookup), None);

        let bad = |_: &str| Some("lots".to_string());
        assert_eq!(resolve_budget("openai", Some(7), bad), Some(7));
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let backend = BudgetedBackend::new(Box::new(MockBackend { should_fail: false }), 2);

        assert!(backend.invoke(invocation()).await.is_ok());
        assert!(backend.invoke(invocation()).await.is_ok());
        match backend.invoke(invocation()).await {
            Err(LlmError::BudgetExceeded { limit, attempted }) => {
                assert_eq!(limit, 2);
                assert_eq!(attempted, 3);
            }
            other => panic!("expected BudgetExceeded, got {other:?}"),
        }
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_calls_consume_budget() {
        let backend = BudgetedBackend::new(Box::new(MockBackend { should_fail: true }), 1);

        assert!(matches!(
            backend.invoke(invocation()).await,
            Err(LlmError::Transport(_))
        ));
        assert!(matches!(
            backend.invoke(invocation()).await,
            Err(LlmError::BudgetExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_streaming_shares_the_budget() {
        let backend = BudgetedBackend::new(Box::new(MockBackend { should_fail: false }), 1);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

        assert!(backend.invoke_streaming(invocation(), &tx).await.is_ok());
        assert!(matches!(
            backend.invoke(invocation()).await,
            Err(LlmError::BudgetExceeded { .. })
        ));
    }
}
