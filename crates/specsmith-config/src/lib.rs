//! Configuration management for specsmith
//!
//! Hierarchical configuration with discovery and precedence:
//! CLI > environment > file > defaults. The TOML file carries `[llm]`,
//! `[clarifier]` and `[generator]` sections.

mod discovery;
mod model;
mod validation;

pub use discovery::{CONFIG_DIR_NAME, CONFIG_FILE_NAME};
pub use model::{
    ClarifierConfig, CliArgs, Config, ConfigSource, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
    DEFAULT_TIMEOUT_SECS, GeneratorConfig, KNOWN_PROVIDERS, LlmConfig, ProviderConfig,
    ProviderSettings,
};
