use specsmith_utils::ConfigError;

use super::model::{Config, KNOWN_PROVIDERS};

impl Config {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let default = self.llm.default_provider.trim();
        if default.is_empty() {
            return Err(ConfigError::MissingRequired("llm.default_provider".to_string()));
        }

        for name in self.llm.chain() {
            if !KNOWN_PROVIDERS.contains(&name.as_str()) {
                let key = if name == default {
                    "llm.default_provider"
                } else {
                    "llm.fallback_providers"
                };
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: format!(
                        "unknown provider '{name}' (expected one of: {})",
                        KNOWN_PROVIDERS.join(", ")
                    ),
                });
            }
        }

        for name in KNOWN_PROVIDERS {
            if let Some(table) = self.llm.provider_table(name) {
                if table.max_tokens == Some(0) {
                    return Err(ConfigError::InvalidValue {
                        key: format!("llm.{name}.max_tokens"),
                        value: "must be greater than 0".to_string(),
                    });
                }
                if table.timeout_secs == Some(0) {
                    return Err(ConfigError::InvalidValue {
                        key: format!("llm.{name}.timeout_secs"),
                        value: "must be greater than 0".to_string(),
                    });
                }
                if let Some(t) = table.temperature
                    && !(0.0..=2.0).contains(&t)
                {
                    return Err(ConfigError::InvalidValue {
                        key: format!("llm.{name}.temperature"),
                        value: format!("{t} is outside 0.0..=2.0"),
                    });
                }
            }
        }

        let clarifier = &self.clarifier;
        if clarifier.min_sub_expectations == 0 {
            return Err(ConfigError::InvalidValue {
                key: "clarifier.min_sub_expectations".to_string(),
                value: "must be greater than 0".to_string(),
            });
        }
        if clarifier.min_sub_expectations > clarifier.max_sub_expectations {
            return Err(ConfigError::InvalidValue {
                key: "clarifier.min_sub_expectations".to_string(),
                value: format!(
                    "{} exceeds max_sub_expectations ({})",
                    clarifier.min_sub_expectations, clarifier.max_sub_expectations
                ),
            });
        }

        Ok(())
    }
}
