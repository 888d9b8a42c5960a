use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use specsmith_utils::ConfigError;

use super::model::{ClarifierConfig, CliArgs, Config, ConfigSource, GeneratorConfig, LlmConfig};

/// Directory holding the project-local configuration file
pub const CONFIG_DIR_NAME: &str = ".specsmith";

/// Configuration file name, both project-local and in the user config dir
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    llm: Option<LlmConfig>,
    clarifier: Option<ClarifierConfig>,
    generator: Option<GeneratorConfig>,
}

impl Config {
    /// Discover and load configuration with precedence:
    /// CLI > environment > file > defaults
    ///
    /// Uses the current working directory for config file discovery when no
    /// explicit path is provided in `cli_args`.
    pub fn discover(cli_args: &CliArgs) -> Result<Self> {
        let start_dir = std::env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&start_dir, cli_args)
    }

    /// Discover and load configuration starting from a specific directory
    pub fn discover_from(start_dir: &Path, cli_args: &CliArgs) -> Result<Self> {
        Self::discover_with(start_dir, cli_args, |key| std::env::var(key).ok())
    }

    /// Path- and environment-driven variant of [`Config::discover`], used by
    /// tests to avoid process-global state.
    pub fn discover_with<F>(start_dir: &Path, cli_args: &CliArgs, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_path = match &cli_args.config_path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(ConfigError::NotFound {
                        path: explicit.display().to_string(),
                    }
                    .into());
                }
                Some(explicit.clone())
            }
            None => Self::discover_config_file_from(start_dir)?.or_else(user_config_file),
        };

        let mut config = Config::default();
        if let Some(path) = &config_path {
            let file_config = Self::load_config_file(path)
                .with_context(|| format!("Failed to load config file: {}", path.display()))?;
            if let Some(llm) = file_config.llm {
                config.llm = llm;
            }
            if let Some(clarifier) = file_config.clarifier {
                config.clarifier = clarifier;
            }
            if let Some(generator) = file_config.generator {
                config.generator = generator;
            }
            config.source = ConfigSource::ConfigFile(path.clone());
            tracing::debug!(path = %path.display(), "loaded configuration file");
        }

        config.apply_env_overrides(env);

        if let Some(provider) = &cli_args.provider {
            config.llm.default_provider = provider.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply `SPECSMITH_PROVIDER` and `SPECSMITH_FALLBACK_PROVIDERS`
    fn apply_env_overrides<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = env("SPECSMITH_PROVIDER")
            && !provider.trim().is_empty()
        {
            self.llm.default_provider = provider.trim().to_string();
        }

        if let Some(list) = env("SPECSMITH_FALLBACK_PROVIDERS") {
            self.llm.fallback_providers = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    /// Search for `.specsmith/config.toml` upward from `start_dir`, stopping
    /// at the filesystem root or a repository root.
    pub fn discover_config_file_from(start_dir: &Path) -> Result<Option<PathBuf>> {
        let mut current_dir = start_dir.to_path_buf();

        loop {
            let config_path = current_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Ok(Some(config_path));
            }

            if current_dir.join(".git").exists() {
                break;
            }

            match current_dir.parent() {
                Some(parent) => current_dir = parent.to_path_buf(),
                None => break,
            }
        }

        Ok(None)
    }

    /// Load configuration from TOML file
    fn load_config_file(path: &Path) -> Result<TomlConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: TomlConfig = toml::from_str(&content).map_err(|e| ConfigError::InvalidFile {
            path: path.display().to_string(),
            reason: e.message().to_string(),
        })?;
        Ok(config)
    }
}

/// `<user config dir>/specsmith/config.toml`, if it exists
fn user_config_file() -> Option<PathBuf> {
    let path = dirs::config_dir()?.join("specsmith").join(CONFIG_FILE_NAME);
    path.exists().then_some(path)
}
