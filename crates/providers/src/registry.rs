//! Provider catalog.
//!
//! The registry is the read-only list of providers and the models each one
//! exposes, built once from [`LlmConfig`] and shared process-wide. It never
//! talks to the network; see [`crate::clients`] for the live clients.

use std::collections::HashSet;

use ag_domain::capability::ProviderCapabilities;
use ag_domain::config::{LlmConfig, ModelConfig, ProviderConfig, ProviderKind, TemperatureRange};
use ag_domain::error::{Error, Result};
use serde::Serialize;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalog entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub id: String,
    pub kind: ProviderKind,
    pub capabilities: ProviderCapabilities,
    /// In configuration order.
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider_id: String,
    /// Name sent to the provider API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_model: Option<String>,
    pub context_window_tokens: u32,
    pub max_output_tokens: u32,
    pub default_max_tokens: u32,
    pub temperature: TemperatureRange,
}

impl ModelInfo {
    pub fn wire_name(&self) -> &str {
        self.api_model.as_deref().unwrap_or(&self.id)
    }
}

impl ProviderInfo {
    pub fn model(&self, model_id: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|m| m.id == model_id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: Vec<ProviderInfo>,
}

impl ProviderRegistry {
    /// Build the catalog, rejecting any provider or model whose declaration
    /// would make routing ambiguous or its defaults unusable.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut providers = Vec::with_capacity(config.providers.len());
        let mut seen = HashSet::new();

        for pc in &config.providers {
            if pc.id.trim().is_empty() {
                return Err(Error::Config("provider id must not be empty".into()));
            }
            if !seen.insert(pc.id.as_str()) {
                return Err(Error::Config(format!("duplicate provider id '{}'", pc.id)));
            }
            providers.push(build_provider(pc)?);
        }

        tracing::debug!(
            providers = providers.len(),
            models = providers.iter().map(|p| p.models.len()).sum::<usize>(),
            "provider catalog loaded"
        );
        Ok(Self { providers })
    }

    /// All providers, in configuration order.
    pub fn list_providers(&self) -> &[ProviderInfo] {
        &self.providers
    }

    pub fn get_provider(&self, provider_id: &str) -> Result<&ProviderInfo> {
        self.providers
            .iter()
            .find(|p| p.id == provider_id)
            .ok_or_else(|| Error::UnknownProvider(provider_id.to_string()))
    }

    /// Resolve a model. The model id is only meaningful with its owning
    /// provider: the same id under another provider is `UnknownModel`.
    pub fn get_model(&self, provider_id: &str, model_id: &str) -> Result<&ModelInfo> {
        self.get_provider(provider_id)?
            .model(model_id)
            .ok_or_else(|| Error::UnknownModel {
                provider: provider_id.to_string(),
                model: model_id.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

fn build_provider(pc: &ProviderConfig) -> Result<ProviderInfo> {
    if pc.models.is_empty() {
        return Err(Error::Config(format!(
            "provider '{}' declares no models",
            pc.id
        )));
    }

    let mut seen = HashSet::new();
    let mut models = Vec::with_capacity(pc.models.len());
    for mc in &pc.models {
        if !seen.insert(mc.id.as_str()) {
            return Err(Error::Config(format!(
                "provider '{}' declares model '{}' twice",
                pc.id, mc.id
            )));
        }
        validate_model(&pc.id, mc)?;
        models.push(ModelInfo {
            id: mc.id.clone(),
            provider_id: pc.id.clone(),
            api_model: mc.api_model.clone(),
            context_window_tokens: mc.context_window_tokens,
            max_output_tokens: mc.max_output_tokens,
            default_max_tokens: mc.default_max_tokens,
            temperature: mc.temperature,
        });
    }

    Ok(ProviderInfo {
        id: pc.id.clone(),
        kind: pc.kind,
        capabilities: ProviderCapabilities {
            supports_streaming: pc.streaming(),
            supports_system_prompt: pc.system_prompt(),
            max_context_tokens: models.iter().map(|m| m.context_window_tokens).max(),
        },
        models,
    })
}

fn validate_model(provider: &str, mc: &ModelConfig) -> Result<()> {
    let at = |msg: String| Error::Config(format!("{provider}/{}: {msg}", mc.id));

    if mc.id.trim().is_empty() {
        return Err(Error::Config(format!(
            "provider '{provider}' has a model with an empty id"
        )));
    }
    let t = &mc.temperature;
    if !t.min.is_finite() || !t.max.is_finite() || t.min < 0.0 || t.min > t.max {
        return Err(at(format!(
            "temperature range {}..={} is invalid",
            t.min, t.max
        )));
    }
    if !t.contains(t.default) {
        return Err(at(format!(
            "default temperature {} outside {}..={}",
            t.default, t.min, t.max
        )));
    }
    if mc.max_output_tokens == 0 {
        return Err(at("max_output_tokens must be > 0".into()));
    }
    if mc.default_max_tokens == 0 || mc.default_max_tokens > mc.max_output_tokens {
        return Err(at(format!(
            "default_max_tokens {} must be within 1..={}",
            mc.default_max_tokens, mc.max_output_tokens
        )));
    }
    if mc.max_output_tokens >= mc.context_window_tokens {
        return Err(at(format!(
            "max_output_tokens {} leaves no room in a {}-token context window",
            mc.max_output_tokens, mc.context_window_tokens
        )));
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ag_domain::error::ErrorKind;

    fn default_registry() -> ProviderRegistry {
        ProviderRegistry::from_config(&LlmConfig::default()).unwrap()
    }

    #[test]
    fn lists_in_config_order() {
        let reg = default_registry();
        let ids: Vec<&str> = reg.list_providers().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["openai", "anthropic", "google", "mistral"]);
        let openai = reg.get_provider("openai").unwrap();
        let models: Vec<&str> = openai.models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(models, vec!["gpt-3.5-turbo", "gpt-4", "gpt-4-turbo"]);
        assert_eq!(openai.capabilities.max_context_tokens, Some(128_000));
    }

    #[test]
    fn get_model_success() {
        let reg = default_registry();
        let m = reg.get_model("openai", "gpt-4").unwrap();
        assert_eq!(m.provider_id, "openai");
        assert_eq!(m.wire_name(), "gpt-4");
        let opus = reg.get_model("anthropic", "claude-3-opus").unwrap();
        assert_eq!(opus.wire_name(), "claude-3-opus-20240229");
    }

    #[test]
    fn model_under_wrong_provider_is_unknown_model() {
        let reg = default_registry();
        let err = reg.get_model("anthropic", "gpt-4").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownModel);
    }

    #[test]
    fn missing_provider_is_unknown_provider() {
        let reg = default_registry();
        let err = reg.get_model("cohere", "command").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownProvider);
    }

    #[test]
    fn provider_without_models_rejected() {
        let mut cfg = LlmConfig::default();
        cfg.providers[1].models.clear();
        let err = ProviderRegistry::from_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("declares no models"));
    }

    #[test]
    fn duplicate_provider_rejected() {
        let mut cfg = LlmConfig::default();
        cfg.providers.push(cfg.providers[0].clone());
        assert!(ProviderRegistry::from_config(&cfg).is_err());
    }

    #[test]
    fn duplicate_model_rejected() {
        let mut cfg = LlmConfig::default();
        let dup = cfg.providers[0].models[0].clone();
        cfg.providers[0].models.push(dup);
        let err = ProviderRegistry::from_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn inverted_temperature_range_rejected() {
        let mut cfg = LlmConfig::default();
        cfg.providers[0].models[0].temperature = TemperatureRange {
            min: 1.0,
            max: 0.5,
            default: 0.7,
        };
        assert!(ProviderRegistry::from_config(&cfg).is_err());
    }

    #[test]
    fn default_max_tokens_above_output_cap_rejected() {
        let mut cfg = LlmConfig::default();
        cfg.providers[0].models[0].default_max_tokens = 10_000;
        let err = ProviderRegistry::from_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("default_max_tokens"));
    }

    #[test]
    fn capabilities_follow_kind() {
        let reg = default_registry();
        for p in reg.list_providers() {
            assert!(p.capabilities.supports_streaming, "{}", p.id);
            assert!(p.capabilities.supports_system_prompt);
        }
    }
}
