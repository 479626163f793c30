//! `aggregator chat`: one-shot chat command.
//!
//! Sends a single message through the dispatcher, prints the reply to
//! stdout and exits. Useful for scripting and for checking provider
//! credentials without starting the server.

use std::io::Write;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use ag_domain::config::Config;
use ag_domain::message::{ChatMessage, Conversation};
use ag_domain::settings::UserSettings;
use ag_domain::stream::StreamEvent;

use crate::bootstrap;

#[derive(Debug, Clone, Default)]
pub struct ChatArgs {
    pub message: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system: Option<String>,
    pub stream: bool,
    pub json: bool,
}

impl ChatArgs {
    /// One-turn session; the command-line flags become its defaults.
    fn into_session(self) -> Conversation {
        let mut conv = Conversation::new("cli").with_settings(UserSettings {
            default_provider: self.provider,
            default_model: self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            ..Default::default()
        });
        if let Some(system) = self.system {
            conv.push(ChatMessage::system(system));
        }
        conv.push(ChatMessage::user(self.message));
        conv
    }
}

/// Run one request and print the result. Ctrl-C cancels the in-flight call.
///
/// Returns `false` when the request failed, so the caller can exit 1.
pub async fn run(config: Arc<Config>, args: ChatArgs) -> anyhow::Result<bool> {
    let state = bootstrap::build_app_state(config)?;
    let settings = state.config.defaults.user_settings();
    let json_output = args.json;
    let streaming = args.stream;
    let conv = args.into_session();

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    if !streaming {
        return match state.dispatcher.send_session(&conv, Some(&settings), &cancel).await {
            Ok(resp) if json_output => {
                println!("{}", serde_json::to_string_pretty(&resp)?);
                Ok(true)
            }
            Ok(resp) => {
                println!("{}", resp.content);
                eprintln!(
                    "\x1b[2m[{}/{} in {}ms, {} attempt(s)]\x1b[0m",
                    resp.provider, resp.model, resp.latency_ms, resp.attempts
                );
                Ok(true)
            }
            Err(e) => {
                report_error(&e, json_output)?;
                Ok(false)
            }
        };
    }

    let mut stream = match state.dispatcher.stream_session(&conv, Some(&settings), cancel).await {
        Ok(s) => s,
        Err(e) => {
            report_error(&e, json_output)?;
            return Ok(false);
        }
    };

    let mut ok = true;
    while let Some(item) = stream.events.next().await {
        match item {
            Ok(StreamEvent::Token { text }) if !json_output => {
                print!("{text}");
                std::io::stdout().flush().ok();
            }
            Ok(event) if json_output => println!("{}", serde_json::to_string(&event)?),
            Ok(StreamEvent::Done { .. }) => println!(),
            Ok(_) => {}
            Err(e) => {
                if !json_output {
                    println!();
                }
                report_error(&e, json_output)?;
                ok = false;
            }
        }
    }
    Ok(ok)
}

fn report_error(e: &ag_domain::error::DispatchError, json_output: bool) -> anyhow::Result<()> {
    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "error": e.body() }))?
        );
    } else {
        eprintln!("error ({}): {e}", e.kind());
    }
    Ok(())
}
