//! AppState construction shared by `serve` and the one-shot CLI commands.

use std::sync::Arc;

use anyhow::Context;

use ag_domain::config::{Config, ConfigSeverity};
use ag_providers::{Dispatcher, ProviderClients, ProviderRegistry};

use crate::settings::InMemorySettingsStore;
use crate::state::AppState;

/// Validate config and wire the catalog, clients, dispatcher and settings
/// store into an [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if Config::has_errors(&issues) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Provider catalog ─────────────────────────────────────────────
    let registry = Arc::new(
        ProviderRegistry::from_config(&config.llm).context("building provider catalog")?,
    );
    tracing::info!(providers = registry.len(), "provider catalog ready");

    // ── Provider clients ─────────────────────────────────────────────
    let clients = Arc::new(
        ProviderClients::from_config(&config.llm).context("initializing LLM providers")?,
    );
    if clients.is_empty() {
        tracing::info!(
            "no LLM providers initialized; configure API keys to enable chat endpoints"
        );
    } else {
        tracing::info!(
            ready = clients.len(),
            failed = clients.init_errors().len(),
            "LLM provider clients ready"
        );
    }

    // ── Dispatcher ───────────────────────────────────────────────────
    let dispatcher = Arc::new(Dispatcher::from_config(
        &config.llm,
        registry.clone(),
        clients.clone(),
    ));
    tracing::info!(
        timeout_ms = config.llm.default_timeout_ms,
        max_attempts = config.llm.retry.max_attempts,
        "dispatcher ready"
    );

    // ── Settings ─────────────────────────────────────────────────────
    let settings = Arc::new(InMemorySettingsStore::new(
        config.defaults.user_settings(),
        registry.clone(),
    ));

    Ok(AppState {
        config,
        registry,
        clients,
        dispatcher,
        settings,
    })
}
