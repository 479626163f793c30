use ag_domain::config::{Config, ConfigSeverity};
use ag_providers::ProviderRegistry;

/// Validate the config and check that the provider catalog builds,
/// printing every issue found.
///
/// Returns `false` when any issue is an error; warnings alone pass.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();
    let catalog = ProviderRegistry::from_config(&config.llm);

    if issues.is_empty() {
        if let Ok(registry) = &catalog {
            let models: usize = registry.list_providers().iter().map(|p| p.models.len()).sum();
            println!(
                "Config OK ({config_path}): {} provider(s), {models} model(s)",
                registry.len()
            );
            return true;
        }
    }

    for issue in &issues {
        println!("{issue}");
    }
    let mut errors = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    if let Err(e) = &catalog {
        println!("[ERROR] llm.providers: {e}");
        errors += 1;
    }

    println!(
        "\n{errors} error(s), {} warning(s) in {config_path}",
        issues.len() - issues.iter().filter(|e| e.severity == ConfigSeverity::Error).count(),
    );

    errors == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
///
/// Inline API keys are masked.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let mut redacted = config.clone();
    for p in &mut redacted.llm.providers {
        if p.auth.key.is_some() {
            p.auth.key = Some("********".into());
        }
    }
    print!("{}", toml::to_string_pretty(&redacted)?);
    Ok(())
}
