//! Exit codes of the specsmith binary.
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Operation completed successfully |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CLI_ARGS` | Invalid CLI arguments or configuration |
//! | 3 | `GENERATION_FAILED` | A generation run ended in `error` |
//! | 10 | `PROVIDER_TIMEOUT` | The last provider of the chain timed out |
//! | 70 | `PROVIDER_FAILURE` | Every provider of the chain failed |

use crate::error::{ConfigError, LlmError};

/// Process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);

    pub const INTERNAL: ExitCode = ExitCode(1);

    /// Invalid CLI arguments or configuration
    pub const CLI_ARGS: ExitCode = ExitCode(2);

    pub const GENERATION_FAILED: ExitCode = ExitCode(3);

    pub const PROVIDER_TIMEOUT: ExitCode = ExitCode(10);

    /// No provider produced an answer
    pub const PROVIDER_FAILURE: ExitCode = ExitCode(70);

    /// Numeric value for `std::process::exit()`
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.0
    }
}

impl From<&ConfigError> for ExitCode {
    fn from(_: &ConfigError) -> Self {
        ExitCode::CLI_ARGS
    }
}

impl From<&LlmError> for ExitCode {
    fn from(err: &LlmError) -> Self {
        match err {
            LlmError::Misconfiguration(_) | LlmError::Unsupported(_) | LlmError::NoProviders => {
                ExitCode::CLI_ARGS
            }
            LlmError::Timeout { .. } => ExitCode::PROVIDER_TIMEOUT,
            LlmError::Transport(_)
            | LlmError::ProviderAuth(_)
            | LlmError::ProviderQuota(_)
            | LlmError::ProviderOutage(_)
            | LlmError::BudgetExceeded { .. }
            | LlmError::FallbackExhausted { .. } => ExitCode::PROVIDER_FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::SUCCESS.as_i32(), 0);
        assert_eq!(ExitCode::CLI_ARGS.as_i32(), 2);
        assert_eq!(i32::from(ExitCode::PROVIDER_FAILURE), 70);
    }

    #[test]
    fn test_llm_error_mapping() {
        assert_eq!(
            ExitCode::from(&LlmError::Misconfiguration("no key".to_string())),
            ExitCode::CLI_ARGS
        );
        assert_eq!(
            ExitCode::from(&LlmError::Timeout {
                duration: Duration::from_secs(5)
            }),
            ExitCode::PROVIDER_TIMEOUT
        );
        assert_eq!(
            ExitCode::from(&LlmError::FallbackExhausted {
                attempted: vec!["anthropic".to_string()],
                last_error: "boom".to_string(),
            }),
            ExitCode::PROVIDER_FAILURE
        );
    }

    #[test]
    fn test_config_error_mapping() {
        let err = ConfigError::MissingRequired("llm.default_provider".to_string());
        assert_eq!(ExitCode::from(&err), ExitCode::CLI_ARGS);
    }
}
