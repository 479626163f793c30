//! Live provider clients.
//!
//! At startup every catalog entry gets a client built for its `kind`.
//! Credentials are resolved eagerly; a provider whose client fails to build
//! stays in the catalog but is reported as unavailable.

use std::collections::HashMap;
use std::sync::Arc;

use crate::anthropic::AnthropicProvider;
use crate::canned::CannedProvider;
use crate::google::GoogleProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;
use ag_domain::config::{LlmConfig, LlmStartupPolicy, ProviderConfig, ProviderKind};
use ag_domain::error::{Error, Result};

#[derive(Default)]
pub struct ProviderClients {
    clients: HashMap<String, Arc<dyn LlmProvider>>,
    init_errors: Vec<ProviderInitError>,
}

/// A provider whose client could not be built.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderInitError {
    pub provider_id: String,
    pub kind: ProviderKind,
    pub error: String,
}

fn build_client(pc: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    Ok(match pc.kind {
        ProviderKind::OpenaiCompat => Arc::new(OpenAiCompatProvider::from_config(pc)?),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::from_config(pc)?),
        ProviderKind::Google => Arc::new(GoogleProvider::from_config(pc)?),
        ProviderKind::Canned => Arc::new(CannedProvider::from_config(pc)?),
    })
}

impl ProviderClients {
    /// Build a client per configured provider.
    ///
    /// Failures are logged and recorded. Under
    /// [`LlmStartupPolicy::RequireOne`] it is an error for none to succeed.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut this = Self::default();

        for pc in &config.providers {
            match build_client(pc) {
                Ok(client) => {
                    tracing::info!(provider_id = %pc.id, kind = ?pc.kind, "registered LLM provider");
                    this.clients.insert(pc.id.clone(), client);
                }
                Err(e) => {
                    tracing::warn!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        error = %e,
                        "failed to initialize LLM provider, skipping"
                    );
                    this.init_errors.push(ProviderInitError {
                        provider_id: pc.id.clone(),
                        kind: pc.kind,
                        error: e.to_string(),
                    });
                }
            }
        }

        if this.clients.is_empty() && !config.providers.is_empty() {
            if config.startup_policy == LlmStartupPolicy::RequireOne {
                return Err(Error::Config(
                    "all configured LLM providers failed to initialize".into(),
                ));
            }
            tracing::warn!(
                "no LLM providers initialized; chat requests will fail until auth is configured"
            );
        }

        Ok(this)
    }

    /// Register a client directly. Used by tests and embedders.
    pub fn insert(&mut self, client: Arc<dyn LlmProvider>) {
        self.clients.insert(client.provider_id().to_string(), client);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.clients.get(provider_id).cloned()
    }

    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }

    /// Initialized provider ids, sorted.
    pub fn ready_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clients.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_domain::config::{AuthConfig, CannedConfig, ModelConfig};

    fn canned(id: &str) -> ProviderConfig {
        ProviderConfig {
            id: id.into(),
            kind: ProviderKind::Canned,
            base_url: String::new(),
            auth: AuthConfig::default(),
            supports_streaming: None,
            supports_system_prompt: None,
            models: vec![ModelConfig::new("echo", 4096, 1024)],
            canned: Some(CannedConfig::default()),
        }
    }

    fn keyless_openai() -> ProviderConfig {
        ProviderConfig {
            kind: ProviderKind::OpenaiCompat,
            auth: AuthConfig {
                env: Some("AG_TEST_CLIENTS_NO_SUCH_KEY".into()),
                key: None,
            },
            ..canned("remote")
        }
    }

    #[test]
    fn missing_key_is_recorded_not_fatal() {
        let cfg = LlmConfig {
            providers: vec![canned("local"), keyless_openai()],
            ..Default::default()
        };
        let clients = ProviderClients::from_config(&cfg).unwrap();
        assert_eq!(clients.ready_providers(), vec!["local".to_string()]);
        assert_eq!(clients.init_errors().len(), 1);
        assert_eq!(clients.init_errors()[0].provider_id, "remote");
        assert!(clients.get("remote").is_none());
    }

    #[test]
    fn require_one_fails_when_nothing_initializes() {
        let cfg = LlmConfig {
            providers: vec![keyless_openai()],
            startup_policy: LlmStartupPolicy::RequireOne,
            ..Default::default()
        };
        assert!(ProviderClients::from_config(&cfg).is_err());
    }

    #[test]
    fn allow_none_boots_without_clients() {
        let cfg = LlmConfig {
            providers: vec![keyless_openai()],
            ..Default::default()
        };
        let clients = ProviderClients::from_config(&cfg).unwrap();
        assert!(clients.is_empty());
    }
}
