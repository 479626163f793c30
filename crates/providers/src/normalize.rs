//! Request normalization.
//!
//! Turns a caller's [`ChatRequest`] plus optional [`UserSettings`] into a
//! fully resolved [`CompletionRequest`]: target resolution, parameter
//! fallbacks and bounds, and history truncation to fit the context window.

use ag_domain::chat::ChatRequest;
use ag_domain::error::{Error, Result};
use ag_domain::message::{ChatMessage, Role};
use ag_domain::settings::UserSettings;

use crate::registry::{ModelInfo, ProviderRegistry};
use crate::traits::CompletionRequest;

/// Fixed per-message cost for role markers and separators.
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Rough token count: about four characters per token, never zero.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() / 4).max(1) as u32
}

fn message_tokens(msg: &ChatMessage) -> u32 {
    estimate_tokens(&msg.content) + MESSAGE_OVERHEAD_TOKENS
}

#[derive(Debug, Clone)]
pub struct NormalizedRequest {
    pub provider_id: String,
    pub model: ModelInfo,
    pub payload: CompletionRequest,
    /// Oldest non-system messages removed to fit the window.
    pub dropped_messages: usize,
    pub estimated_prompt_tokens: u32,
    pub budget_tokens: u32,
}

/// Resolve and validate `req` against the catalog.
pub fn normalize(
    registry: &ProviderRegistry,
    req: &ChatRequest,
    settings: Option<&UserSettings>,
) -> Result<NormalizedRequest> {
    if req.messages.is_empty() {
        return Err(Error::invalid("messages", "at least one message is required"));
    }
    if req.messages.iter().all(ChatMessage::is_system) {
        return Err(Error::invalid(
            "messages",
            "at least one user or assistant message is required",
        ));
    }

    let provider_id = req
        .provider
        .clone()
        .or_else(|| settings.and_then(|s| s.default_provider.clone()))
        .ok_or_else(|| Error::invalid("provider", "no provider in request or user settings"))?;
    let provider = registry.get_provider(&provider_id)?;

    // A settings model only belongs to the settings provider.
    let model_id = match (&req.model, settings) {
        (Some(model), _) => model.clone(),
        (None, Some(s)) if s.default_provider.as_deref() == Some(provider_id.as_str()) => s
            .default_model
            .clone()
            .ok_or_else(|| Error::invalid("model", "no model in request or user settings"))?,
        (None, Some(s)) if s.default_model.is_some() => {
            return Err(Error::invalid(
                "model",
                format!(
                    "no model given for provider '{provider_id}'; \
                     the default model belongs to another provider"
                ),
            ));
        }
        (None, _) => {
            return Err(Error::invalid("model", "no model in request or user settings"));
        }
    };

    let model = registry.get_model(&provider_id, &model_id)?;

    let temperature = req
        .temperature
        .or_else(|| settings.and_then(|s| s.temperature))
        .unwrap_or(model.temperature.default);
    check_temperature(model, temperature)?;

    let max_tokens = req
        .max_tokens
        .or_else(|| settings.and_then(|s| s.max_tokens))
        .unwrap_or(model.default_max_tokens);
    check_max_tokens(model, max_tokens)?;

    let budget = model.context_window_tokens.saturating_sub(max_tokens);
    let fitted = fit_history(&req.messages, budget)?;

    let messages = if provider.capabilities.supports_system_prompt {
        fitted.messages
    } else {
        fold_system_messages(fitted.messages)
    };

    let correlation = match settings {
        Some(s) => req.correlation.clone().or(s.correlation()),
        None => req.correlation.clone(),
    };

    Ok(NormalizedRequest {
        provider_id,
        payload: CompletionRequest {
            model: model.wire_name().to_string(),
            messages,
            temperature,
            max_tokens,
            correlation,
        },
        model: model.clone(),
        dropped_messages: fitted.dropped,
        estimated_prompt_tokens: fitted.tokens,
        budget_tokens: budget,
    })
}

/// Bounds check shared with settings validation.
pub fn check_temperature(model: &ModelInfo, temperature: f32) -> Result<()> {
    if model.temperature.contains(temperature) {
        return Ok(());
    }
    Err(Error::invalid(
        "temperature",
        format!(
            "{temperature} is outside {}..={} for {}/{}",
            model.temperature.min, model.temperature.max, model.provider_id, model.id
        ),
    ))
}

/// Bounds check shared with settings validation.
pub fn check_max_tokens(model: &ModelInfo, max_tokens: u32) -> Result<()> {
    if (1..=model.max_output_tokens).contains(&max_tokens) {
        return Ok(());
    }
    Err(Error::invalid(
        "max_tokens",
        format!(
            "{max_tokens} is outside 1..={} for {}/{}",
            model.max_output_tokens, model.provider_id, model.id
        ),
    ))
}

// ── history truncation ──────────────────────────────────────────────

struct Fitted {
    messages: Vec<ChatMessage>,
    dropped: usize,
    tokens: u32,
}

/// Keep every system message and the longest suffix of the remaining
/// history that fits in `budget`, preserving original order.
fn fit_history(messages: &[ChatMessage], budget: u32) -> Result<Fitted> {
    let system_tokens: u32 = messages
        .iter()
        .filter(|m| m.is_system())
        .map(message_tokens)
        .sum();
    if system_tokens > budget {
        return Err(Error::ContextOverflow(format!(
            "system messages need ~{system_tokens} tokens, budget is {budget}"
        )));
    }

    let mut used = system_tokens;
    // Index of the oldest non-system message that still fits.
    let mut cutoff = messages.len();
    for (i, msg) in messages.iter().enumerate().rev() {
        if msg.is_system() {
            continue;
        }
        let cost = message_tokens(msg);
        if used + cost > budget {
            break;
        }
        used += cost;
        cutoff = i;
    }

    let kept_any = messages[cutoff.min(messages.len())..]
        .iter()
        .any(|m| !m.is_system());
    if !kept_any {
        return Err(Error::ContextOverflow(format!(
            "latest message does not fit in the {budget}-token budget"
        )));
    }

    let mut dropped = 0;
    let kept: Vec<ChatMessage> = messages
        .iter()
        .enumerate()
        .filter(|(i, m)| {
            let keep = m.is_system() || *i >= cutoff;
            if !keep {
                dropped += 1;
            }
            keep
        })
        .map(|(_, m)| m.clone())
        .collect();

    Ok(Fitted {
        messages: kept,
        dropped,
        tokens: used,
    })
}

/// For providers without a system role: prepend system text to the first
/// user turn, or open with a user turn if there is none.
fn fold_system_messages(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let (system, mut rest): (Vec<_>, Vec<_>) = messages.into_iter().partition(|m| m.is_system());
    if system.is_empty() {
        return rest;
    }
    let preamble = system
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    match rest.iter_mut().find(|m| m.role == Role::User) {
        Some(first_user) => {
            first_user.content = format!("{preamble}\n\n{}", first_user.content);
        }
        None => rest.insert(0, ChatMessage::user(preamble)),
    }
    rest
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
