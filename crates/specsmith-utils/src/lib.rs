//! Foundation utilities for specsmith
//!
//! Holds the error taxonomy shared by every crate in the workspace, the exit
//! codes of the binary and the tracing subscriber setup.

pub mod error;
pub mod exit_codes;
pub mod logging;

pub use error::{ConfigError, ErrorCategory, LlmError, UserFriendlyError};
pub use exit_codes::ExitCode;
