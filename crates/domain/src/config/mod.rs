mod llm;
mod observability;
mod server;

pub use llm::*;
pub use observability::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::settings::UserSettings;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Defaults for users without stored settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "d_provider")]
    pub provider: String,
    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            provider: d_provider(),
            model: d_model(),
            temperature: d_temperature(),
            max_tokens: d_max_tokens(),
        }
    }
}

impl DefaultsConfig {
    /// Settings record a brand-new user starts from.
    pub fn user_settings(&self) -> UserSettings {
        UserSettings {
            default_provider: Some(self.provider.clone()),
            default_model: Some(self.model.clone()),
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

fn d_provider() -> String {
    "openai".into()
}
fn d_model() -> String {
    "gpt-3.5-turbo".into()
}
fn d_temperature() -> f32 {
    0.7
}
fn d_max_tokens() -> u32 {
    1_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }
        if self.server.max_concurrent_requests == 0 {
            errors.push(ConfigError::error(
                "server.max_concurrent_requests",
                "must be greater than 0",
            ));
        }
        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        self.validate_llm(&mut errors);
        self.validate_defaults(&mut errors);

        let rate = self.observability.sample_rate;
        if !(0.0..=1.0).contains(&rate) {
            errors.push(ConfigError::error(
                "observability.sample_rate",
                format!("must be within 0.0..=1.0, got {rate}"),
            ));
        }

        errors
    }

    fn validate_llm(&self, errors: &mut Vec<ConfigError>) {
        let llm = &self.llm;

        if llm.default_timeout_ms == 0 {
            errors.push(ConfigError::error(
                "llm.default_timeout_ms",
                "timeout must be greater than 0",
            ));
        }

        let retry = &llm.retry;
        if retry.max_attempts == 0 {
            errors.push(ConfigError::error(
                "llm.retry.max_attempts",
                "must be at least 1 (the first call counts)",
            ));
        }
        if retry.max_attempts > 10 {
            errors.push(ConfigError::warning(
                "llm.retry.max_attempts",
                format!("{} attempts multiplies provider load on outages", retry.max_attempts),
            ));
        }
        if retry.multiplier.is_nan() || retry.multiplier < 1.0 {
            errors.push(ConfigError::error("llm.retry.multiplier", "must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            errors.push(ConfigError::error("llm.retry.jitter", "must be within 0.0..=1.0"));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            errors.push(ConfigError::error(
                "llm.retry.base_delay_ms",
                "must not exceed max_delay_ms",
            ));
        }

        if llm.providers.is_empty() {
            errors.push(ConfigError::warning("llm.providers", "no LLM providers configured"));
        }

        let mut seen = HashSet::new();
        for (i, provider) in llm.providers.iter().enumerate() {
            if provider.id.is_empty() {
                errors.push(ConfigError::error(
                    format!("llm.providers[{i}].id"),
                    "provider id must not be empty",
                ));
            } else if !seen.insert(provider.id.as_str()) {
                errors.push(ConfigError::error(
                    format!("llm.providers[{i}].id"),
                    format!("duplicate provider id '{}'", provider.id),
                ));
            }
            if provider.models.is_empty() {
                errors.push(ConfigError::error(
                    format!("llm.providers[{i}].models"),
                    format!("provider '{}' declares no models", provider.id),
                ));
            }
            if provider.kind.needs_api_key()
                && provider.auth.env.is_none()
                && provider.auth.key.is_none()
            {
                errors.push(ConfigError::warning(
                    format!("llm.providers[{i}].auth"),
                    "no auth.env or auth.key; the provider will be unavailable",
                ));
            }
            if provider.auth.key.is_some() {
                errors.push(ConfigError::warning(
                    format!("llm.providers[{i}].auth.key"),
                    "plaintext key in config; prefer auth.env",
                ));
            }
        }
    }

    fn validate_defaults(&self, errors: &mut Vec<ConfigError>) {
        let d = &self.defaults;
        let Some(provider) = self.llm.providers.iter().find(|p| p.id == d.provider) else {
            errors.push(ConfigError::error(
                "defaults.provider",
                format!("'{}' is not a configured provider", d.provider),
            ));
            return;
        };
        let Some(model) = provider.models.iter().find(|m| m.id == d.model) else {
            errors.push(ConfigError::error(
                "defaults.model",
                format!("'{}' is not a model of provider '{}'", d.model, d.provider),
            ));
            return;
        };
        if !model.temperature.contains(d.temperature) {
            errors.push(ConfigError::error(
                "defaults.temperature",
                format!(
                    "{} is outside {}..={} for {}",
                    d.temperature, model.temperature.min, model.temperature.max, model.id
                ),
            ));
        }
        if d.max_tokens == 0 || d.max_tokens > model.max_output_tokens {
            errors.push(ConfigError::error(
                "defaults.max_tokens",
                format!("must be within 1..={} for {}", model.max_output_tokens, model.id),
            ));
        }
    }

    /// True when `validate` reported at least one error.
    pub fn has_errors(issues: &[ConfigError]) -> bool {
        issues.iter().any(|e| e.severity == ConfigSeverity::Error)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
