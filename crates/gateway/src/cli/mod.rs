pub mod chat;
pub mod config;
pub mod models;

use clap::{Parser, Subcommand};

/// Aggregator: one chat API in front of many model providers.
#[derive(Debug, Parser)]
#[command(name = "aggregator", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// List configured providers and models.
    Models,
    /// Send a single message and print the reply.
    Chat {
        /// The user message to send.
        message: String,
        /// Provider id (defaults to `[defaults].provider`).
        #[arg(long)]
        provider: Option<String>,
        /// Model id (defaults to `[defaults].model`).
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        max_tokens: Option<u32>,
        /// System prompt placed before the message.
        #[arg(long)]
        system: Option<String>,
        /// Print tokens as they arrive.
        #[arg(long)]
        stream: bool,
        /// Output JSON instead of plain text.
        #[arg(long)]
        json: bool,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from `AG_CONFIG` (or `config.toml`). A missing
/// file yields the built-in defaults. Returns the config and the path used.
pub fn load_config() -> anyhow::Result<(ag_domain::config::Config, String)> {
    let config_path = std::env::var("AG_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(&config_path)?;
    Ok((config, config_path))
}

pub fn load_config_from(path: &str) -> anyhow::Result<ag_domain::config::Config> {
    if !std::path::Path::new(path).exists() {
        return Ok(ag_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("reading {path}: {e}"))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {path}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = load_config_from("/nonexistent/aggregator.toml").unwrap();
        assert_eq!(cfg.server.port, 3210);
        assert_eq!(cfg.defaults.model, "gpt-3.5-turbo");
    }

    #[test]
    fn reads_toml_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[server]\nport = 9000\n\n[defaults]\nmodel = \"gpt-4\"").unwrap();
        let cfg = load_config_from(f.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.defaults.model, "gpt-4");
    }

    #[test]
    fn bad_toml_is_an_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[server\nport = ").unwrap();
        assert!(load_config_from(f.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn example_config_is_valid() {
        let cfg: ag_domain::config::Config =
            toml::from_str(include_str!("../../../../config.example.toml")).unwrap();
        assert!(!ag_domain::config::Config::has_errors(&cfg.validate()));
        assert_eq!(cfg.llm.providers.len(), 3);
        assert_eq!(cfg.llm.retry.max_attempts, 3);
        assert!(ag_providers::ProviderRegistry::from_config(&cfg.llm).is_ok());
    }

    #[test]
    fn chat_flags_parse() {
        let cli = Cli::parse_from([
            "aggregator", "chat", "hello", "--provider", "anthropic", "--max-tokens", "50", "--stream",
        ]);
        match cli.command {
            Some(Command::Chat {
                message,
                provider,
                max_tokens,
                stream,
                ..
            }) => {
                assert_eq!(message, "hello");
                assert_eq!(provider.as_deref(), Some("anthropic"));
                assert_eq!(max_tokens, Some(50));
                assert!(stream);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
