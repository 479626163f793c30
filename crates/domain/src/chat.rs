use serde::{Deserialize, Serialize};

use crate::message::ChatMessage;
use crate::stream::Usage;

/// Opaque identifiers forwarded to providers and echoed back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_thread: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_thread: Option<String>,
}

impl Correlation {
    /// Fill unset fields from `fallback`.
    pub fn or(self, fallback: Correlation) -> Correlation {
        Correlation {
            assistant_id: self.assistant_id.or(fallback.assistant_id),
            provider_thread: self.provider_thread.or(fallback.provider_thread),
            session_thread: self.session_thread.or(fallback.session_thread),
        }
    }
}

/// Provider-agnostic chat request as submitted by a caller.
///
/// Any of `provider`, `model`, `temperature`, `max_tokens` may be omitted;
/// the normalizer fills them from user settings and then model defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(flatten)]
    pub correlation: Correlation,
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_target(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self
    }
}

/// Unified response returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub provider: String,
    pub model: String,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Provider calls made, including retried ones.
    pub attempts: u32,
    #[serde(flatten)]
    pub correlation: Correlation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_flat_correlation() {
        let json = r#"{
            "messages": [{"role": "user", "content": "Hello"}],
            "provider": "openai",
            "model": "gpt-3.5-turbo",
            "temperature": 0.7,
            "max_tokens": 1000,
            "assistant_id": "asst_1",
            "session_thread": "thr_9"
        }"#;
        let req: ChatRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.provider.as_deref(), Some("openai"));
        assert_eq!(req.correlation.assistant_id.as_deref(), Some("asst_1"));
        assert_eq!(req.correlation.session_thread.as_deref(), Some("thr_9"));
        assert!(req.correlation.provider_thread.is_none());
        assert!(!req.stream);
    }

    #[test]
    fn correlation_or_prefers_self() {
        let req = Correlation {
            assistant_id: Some("a".into()),
            ..Default::default()
        };
        let settings = Correlation {
            assistant_id: Some("b".into()),
            provider_thread: Some("p".into()),
            session_thread: None,
        };
        let merged = req.or(settings);
        assert_eq!(merged.assistant_id.as_deref(), Some("a"));
        assert_eq!(merged.provider_thread.as_deref(), Some("p"));
        assert!(merged.session_thread.is_none());
    }
}
