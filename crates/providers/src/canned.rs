//! Offline provider answering from a fixed response table.
//!
//! Useful for local development of the chat UI and for exercising the
//! routing core without credentials. It does not stream, so streamed
//! requests against it take the single-chunk path.

use std::collections::HashMap;
use std::time::Duration;

use crate::normalize::estimate_tokens;
use crate::traits::{CompletionRequest, CompletionResponse, LlmProvider};
use ag_domain::config::{CannedConfig, ProviderConfig};
use ag_domain::error::Result;
use ag_domain::stream::Usage;

pub struct CannedProvider {
    id: String,
    delay: Duration,
    responses: HashMap<String, String>,
    fallback: String,
}

impl CannedProvider {
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let canned = cfg.canned.clone().unwrap_or_default();
        Ok(Self::new(&cfg.id, canned))
    }

    pub fn new(id: &str, cfg: CannedConfig) -> Self {
        let mut responses = builtin_responses(id);
        responses.extend(cfg.responses);
        Self {
            id: id.to_string(),
            delay: Duration::from_millis(cfg.delay_ms),
            responses,
            fallback: cfg.fallback,
        }
    }

    fn render(&self, model: &str, message: &str) -> String {
        let template = self.responses.get(model).unwrap_or(&self.fallback);
        template
            .replace("{provider}", &self.id)
            .replace("{model}", model)
            .replace("{message}", message)
    }
}

/// Stock replies for the four well-known provider ids.
fn builtin_responses(provider_id: &str) -> HashMap<String, String> {
    let table: &[(&str, &str)] = match provider_id {
        "openai" => &[
            ("gpt-3.5-turbo", "This is a mock response from OpenAI's GPT-3.5 Turbo. You asked: \"{message}\""),
            ("gpt-4", "This is a sophisticated mock response from OpenAI's GPT-4. Your inquiry was: \"{message}\""),
            ("gpt-4-turbo", "This is a faster and more sophisticated mock response from OpenAI's GPT-4 Turbo. Regarding your message: \"{message}\""),
        ],
        "anthropic" => &[
            ("claude-2", "Claude 2 here with a mock response to: \"{message}\""),
            ("claude-3-opus", "Claude 3 Opus providing a detailed mock response to your query: \"{message}\""),
            ("claude-3-sonnet", "Claude 3 Sonnet with a poetic mock response to: \"{message}\""),
        ],
        "google" => &[
            ("gemini-pro", "Gemini Pro analyzing your request: \"{message}\" and providing this mock response."),
            ("gemini-ultra", "Gemini Ultra with an advanced mock analysis of: \"{message}\""),
        ],
        "mistral" => &[
            ("mistral-small", "Mistral Small responding to: \"{message}\""),
            ("mistral-medium", "Mistral Medium providing a balanced mock response to: \"{message}\""),
            ("mistral-large", "Mistral Large offering a comprehensive mock answer to: \"{message}\""),
        ],
        _ => &[],
    };
    table
        .iter()
        .map(|(m, t)| (m.to_string(), t.to_string()))
        .collect()
}

#[async_trait::async_trait]
impl LlmProvider for CannedProvider {
    async fn send_completion(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let message = req.last_user_message().unwrap_or_default();
        let content = self.render(&req.model, message);
        let prompt: u32 = req.messages.iter().map(|m| estimate_tokens(&m.content)).sum();

        Ok(CompletionResponse {
            usage: Some(Usage::new(prompt, estimate_tokens(&content))),
            content,
            model: req.model.clone(),
            finish_reason: Some("stop".into()),
        })
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}
