//! `aggregator models`: print the provider catalog.

use ag_domain::config::Config;
use ag_providers::{ProviderClients, ProviderRegistry};

pub fn list(config: &Config) -> anyhow::Result<()> {
    let registry = ProviderRegistry::from_config(&config.llm)?;
    let clients = ProviderClients::from_config(&config.llm)?;

    for p in registry.list_providers() {
        let status = if clients.get(&p.id).is_some() {
            "ready"
        } else {
            "no client"
        };
        println!(
            "{} ({:?}, {}, streaming: {})",
            p.id, p.kind, status, p.capabilities.supports_streaming
        );
        for m in &p.models {
            let marker = if p.id == config.defaults.provider && m.id == config.defaults.model {
                " *"
            } else {
                ""
            };
            println!(
                "  {:<20} ctx {:>7}  max out {:>6}  temp {}..={}{marker}",
                m.id, m.context_window_tokens, m.max_output_tokens, m.temperature.min, m.temperature.max
            );
        }
    }

    for e in clients.init_errors() {
        eprintln!("{}: {}", e.provider_id, e.error);
    }
    Ok(())
}
