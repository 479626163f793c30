use std::sync::Arc;

use ag_domain::config::Config;
use ag_domain::error::Result;
use ag_domain::settings::{SettingsStore, UserSettings};
use ag_providers::{Dispatcher, ProviderClients, ProviderRegistry};

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub registry: Arc<ProviderRegistry>,
    pub clients: Arc<ProviderClients>,
    pub dispatcher: Arc<Dispatcher>,

    // ── Account service ───────────────────────────────────────────────
    pub settings: Arc<dyn SettingsStore>,
}

impl AppState {
    /// Settings for a chat request: the user's stored record, else the
    /// configured defaults. Anonymous requests get the defaults too.
    pub async fn effective_settings(&self, user_id: Option<&str>) -> Result<UserSettings> {
        if let Some(user_id) = user_id {
            if let Some(stored) = self.settings.get_defaults(user_id).await? {
                return Ok(stored);
            }
        }
        Ok(self.config.defaults.user_settings())
    }
}
