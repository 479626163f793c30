//! OpenAI-compatible client.
//!
//! Serves OpenAI itself, Mistral, and any other endpoint that follows the
//! chat completions contract (vLLM, Ollama, LM Studio, ...).

use crate::traits::{CompletionRequest, CompletionResponse, LlmProvider};
use crate::util::{error_from_response, from_reqwest, resolve_api_key};
use ag_domain::config::ProviderConfig;
use ag_domain::error::{Error, Result};
use ag_domain::stream::{BoxStream, StreamEvent, Usage};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    streaming: bool,
    /// Ask for a trailing usage chunk when streaming. Only sent to
    /// api.openai.com; other servers reject unknown fields.
    stream_usage: bool,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.auth)?;
        let base_url = cfg.effective_base_url().trim_end_matches('/').to_string();
        Self::new(&cfg.id, &base_url, api_key, cfg.streaming())
    }

    pub fn new(id: &str, base_url: &str, api_key: String, streaming: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            streaming,
            stream_usage: base_url.contains("api.openai.com"),
            client,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            return Err(error_from_response(&self.id, resp).await);
        }
        Ok(resp)
    }

    fn build_chat_body(&self, req: &CompletionRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "temperature": req.temperature,
            "max_tokens": req.max_tokens,
            "stream": stream,
        });
        if stream && self.stream_usage {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(provider: &str, body: &Value) -> Result<CompletionResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Unknown(format!("{provider}: no choices in response")))?;

    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    Ok(CompletionResponse {
        content,
        usage: body.get("usage").and_then(parse_usage),
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        finish_reason: choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}

fn parse_usage(v: &Value) -> Option<Usage> {
    let prompt = v.get("prompt_tokens")?.as_u64()? as u32;
    let completion = v.get("completion_tokens")?.as_u64()? as u32;
    Some(Usage::new(prompt, completion))
}

// ── SSE ─────────────────────────────────────────────────────────────

/// Per-stream parser state. The finish reason arrives one chunk before
/// the usage chunk (when usage is requested), so `Done` is deferred.
#[derive(Default)]
struct StreamState {
    finish_reason: Option<String>,
}

impl StreamState {
    fn done(&mut self, usage: Option<Usage>) -> StreamEvent {
        StreamEvent::Done {
            usage,
            finish_reason: Some(self.finish_reason.take().unwrap_or_else(|| "stop".into())),
        }
    }

    fn parse(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
        if data == "[DONE]" {
            return vec![Ok(self.done(None))];
        }

        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };

        if let Some(err) = v.get("error") {
            let msg = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("stream error");
            return vec![Err(Error::ProviderUnavailable(msg.to_string()))];
        }

        let usage = v.get("usage").and_then(parse_usage);
        let choice = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first());

        let Some(choice) = choice else {
            // Trailing usage-only chunk.
            return match usage {
                Some(u) => vec![Ok(self.done(Some(u)))],
                None => Vec::new(),
            };
        };

        let mut events = Vec::new();
        if let Some(text) = choice
            .get("delta")
            .and_then(|d| d.get("content"))
            .and_then(|v| v.as_str())
        {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::Token {
                    text: text.to_string(),
                }));
            }
        }

        if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            self.finish_reason = Some(fr.to_string());
            // Servers that inline usage with the final choice are done now.
            if usage.is_some() {
                events.push(Ok(self.done(usage)));
            }
        }
        events
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn send_completion(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        tracing::debug!(provider = %self.id, model = %req.model, "openai_compat chat request");

        let resp = self.post(&self.build_chat_body(req, false)).await?;
        let resp_json: Value = resp.json().await.map_err(from_reqwest)?;
        parse_chat_response(&self.id, &resp_json)
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn stream_completion(
        &self,
        req: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        tracing::debug!(provider = %self.id, model = %req.model, "openai_compat stream request");

        let resp = self.post(&self.build_chat_body(req, true)).await?;
        let mut state = StreamState::default();
        Ok(crate::sse::sse_response_stream(resp, move |data| {
            state.parse(data)
        }))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ag_domain::message::ChatMessage;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-3.5-turbo".into(),
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("Hello")],
            temperature: 0.7,
            max_tokens: 1000,
            correlation: Default::default(),
        }
    }

    #[test]
    fn body_carries_all_parameters() {
        let p = OpenAiCompatProvider::new("openai", "https://api.openai.com/v1/", "k".into(), true)
            .unwrap();
        assert_eq!(p.chat_url(), "https://api.openai.com/v1/chat/completions");

        let body = p.build_chat_body(&request(), false);
        assert_eq!(body["model"], "gpt-3.5-turbo");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hello");
        assert!(body.get("stream_options").is_none());

        let streamed = p.build_chat_body(&request(), true);
        assert_eq!(streamed["stream_options"]["include_usage"], true);
    }

    #[test]
    fn mistral_body_has_no_stream_options() {
        let p = OpenAiCompatProvider::new("mistral", "https://api.mistral.ai/v1", "k".into(), true)
            .unwrap();
        let body = p.build_chat_body(&request(), true);
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn parses_completion() {
        let body = serde_json::json!({
            "model": "gpt-3.5-turbo-0125",
            "choices": [{"message": {"role": "assistant", "content": "Hi there"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
        });
        let resp = parse_chat_response("openai", &body).unwrap();
        assert_eq!(resp.content, "Hi there");
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn empty_choices_is_unknown_error() {
        let err = parse_chat_response("openai", &serde_json::json!({"choices": []})).unwrap_err();
        assert!(matches!(err, Error::Unknown(_)));
    }

    #[test]
    fn stream_defers_done_until_usage() {
        let mut st = StreamState::default();
        let ev = st.parse(r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#);
        assert_eq!(ev.len(), 1);
        assert!(matches!(&ev[0], Ok(StreamEvent::Token { text }) if text == "Hi"));

        let ev = st.parse(r#"{"choices":[{"delta":{},"finish_reason":"length"}]}"#);
        assert!(ev.is_empty());

        let ev = st.parse(
            r#"{"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":1,"total_tokens":6}}"#,
        );
        match &ev[0] {
            Ok(StreamEvent::Done {
                usage: Some(u),
                finish_reason,
            }) => {
                assert_eq!(u.total_tokens, 6);
                assert_eq!(finish_reason.as_deref(), Some("length"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stream_done_sentinel() {
        let mut st = StreamState::default();
        let ev = st.parse("[DONE]");
        assert!(matches!(
            &ev[0],
            Ok(StreamEvent::Done { usage: None, finish_reason: Some(r) }) if r == "stop"
        ));
    }

    #[test]
    fn stream_inline_usage_finishes_immediately() {
        let mut st = StreamState::default();
        let ev = st.parse(
            r#"{"choices":[{"delta":{"content":"!"},"finish_reason":"stop"}],"usage":{"prompt_tokens":1,"completion_tokens":1,"total_tokens":2}}"#,
        );
        assert_eq!(ev.len(), 2);
        assert!(matches!(&ev[1], Ok(StreamEvent::Done { usage: Some(_), .. })));
    }
}
