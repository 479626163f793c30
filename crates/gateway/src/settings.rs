//! Process-local stand-in for the account service's settings storage.
//!
//! Records live in memory only and vanish on restart. Every save is
//! merged and checked against the catalog under the write lock, so the
//! stored record is always one the catalog accepts.

use std::collections::HashMap;
use std::sync::Arc;

use ag_domain::error::{Error, Result};
use ag_domain::settings::{SettingsStore, UserSettings};
use ag_providers::normalize::{check_max_tokens, check_temperature};
use ag_providers::ProviderRegistry;
use parking_lot::RwLock;

pub struct InMemorySettingsStore {
    /// Starting record for users with nothing stored.
    defaults: UserSettings,
    registry: Arc<ProviderRegistry>,
    users: RwLock<HashMap<String, UserSettings>>,
}

impl InMemorySettingsStore {
    pub fn new(defaults: UserSettings, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            defaults,
            registry,
            users: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

#[async_trait::async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn get_defaults(&self, user_id: &str) -> Result<Option<UserSettings>> {
        Ok(self.users.read().get(user_id).cloned())
    }

    async fn save_defaults(&self, user_id: &str, update: UserSettings) -> Result<UserSettings> {
        let mut users = self.users.write();
        let mut merged = users
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone());
        merged.merge(update);
        validate_settings(&self.registry, &merged)?;

        users.insert(user_id.to_string(), merged.clone());
        tracing::debug!(user_id, "user settings saved");
        Ok(merged)
    }
}

/// Check a settings record against the catalog.
///
/// A model needs its provider; numeric fields are checked against the
/// model's bounds when the model is known, else only for sanity.
pub fn validate_settings(registry: &ProviderRegistry, settings: &UserSettings) -> Result<()> {
    if let Some(t) = settings.temperature {
        if !t.is_finite() || t < 0.0 {
            return Err(Error::invalid("temperature", format!("{t} is not a valid temperature")));
        }
    }
    if settings.max_tokens == Some(0) {
        return Err(Error::invalid("max_tokens", "must be greater than 0"));
    }

    let Some(provider) = settings.default_provider.as_deref() else {
        if settings.default_model.is_some() {
            return Err(Error::invalid("default_model", "requires default_provider"));
        }
        return Ok(());
    };
    registry.get_provider(provider)?;

    let Some(model_id) = settings.default_model.as_deref() else {
        return Ok(());
    };
    let model = registry.get_model(provider, model_id)?;
    if let Some(t) = settings.temperature {
        check_temperature(model, t)?;
    }
    if let Some(n) = settings.max_tokens {
        check_max_tokens(model, n)?;
    }
    Ok(())
}
