use ag_domain::chat::Correlation;
use ag_domain::error::{Error, Result};
use ag_domain::message::ChatMessage;
use ag_domain::stream::{BoxStream, StreamEvent, Usage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A fully resolved completion request handed to a provider client.
///
/// Every field is concrete: the normalizer has already applied settings
/// fallbacks, bounds checks and history truncation.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Wire model name.
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Forwarded untouched; clients may ignore it.
    pub correlation: Correlation,
}

impl CompletionRequest {
    /// Text of the most recent user message, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == ag_domain::message::Role::User)
            .map(|m| m.content.as_str())
    }
}

/// A provider's answer to a [`CompletionRequest`].
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: Option<Usage>,
    /// The model that actually produced the response.
    pub model: String,
    /// Normalized stop reason (`stop`, `length`, ...).
    pub finish_reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every provider client implements.
///
/// Clients translate between [`CompletionRequest`] and one provider's wire
/// format and map its failures onto the shared error taxonomy. They never
/// retry and never impose their own deadline; the dispatcher owns both.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a completion request and wait for the full response.
    async fn send_completion(&self, req: &CompletionRequest) -> Result<CompletionResponse>;

    /// Whether [`stream_completion`](Self::stream_completion) is implemented.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Send a completion request and return a stream of events.
    async fn stream_completion(
        &self,
        _req: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        Err(Error::invalid(
            "stream",
            format!("provider '{}' does not support streaming", self.provider_id()),
        ))
    }

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
