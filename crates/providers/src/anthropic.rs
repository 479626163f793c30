//! Anthropic Messages API client.
//!
//! System messages go in the top-level `system` field rather than in the
//! message list, and consecutive turns from the same role are merged since
//! the API expects alternating roles.

use crate::traits::{CompletionRequest, CompletionResponse, LlmProvider};
use crate::util::{error_from_response, from_reqwest, resolve_api_key};
use ag_domain::config::ProviderConfig;
use ag_domain::error::{Error, Result};
use ag_domain::message::Role;
use ag_domain::stream::{BoxStream, StreamEvent, Usage};
use serde_json::Value;

const ANTHROPIC_VERSION: &str = "2023-06-01";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AnthropicProvider {
    id: String,
    base_url: String,
    api_key: String,
    streaming: bool,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.auth)?;
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.effective_base_url().trim_end_matches('/').to_string(),
            api_key,
            streaming: cfg.streaming(),
            client,
        })
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            return Err(error_from_response(&self.id, resp).await);
        }
        Ok(resp)
    }
}

fn build_messages_body(req: &CompletionRequest, stream: bool) -> Value {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut turns: Vec<(Role, String)> = Vec::new();

    for msg in &req.messages {
        match msg.role {
            Role::System => system_parts.push(&msg.content),
            role => match turns.last_mut() {
                Some((last, text)) if *last == role => {
                    text.push_str("\n\n");
                    text.push_str(&msg.content);
                }
                _ => turns.push((role, msg.content.clone())),
            },
        }
    }

    let messages: Vec<Value> = turns
        .into_iter()
        .map(|(role, text)| serde_json::json!({ "role": role.as_str(), "content": text }))
        .collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.max_tokens,
        "temperature": req.temperature,
        "stream": stream,
    });
    if !system_parts.is_empty() {
        body["system"] = Value::String(system_parts.join("\n\n"));
    }
    body
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn normalize_stop_reason(s: &str) -> String {
    match s {
        "end_turn" | "stop_sequence" => "stop".into(),
        "max_tokens" => "length".into(),
        other => other.into(),
    }
}

fn parse_anthropic_response(body: &Value) -> Result<CompletionResponse> {
    let blocks = body
        .get("content")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::Unknown("anthropic: response has no content array".into()))?;

    let content: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();

    Ok(CompletionResponse {
        content,
        usage: body.get("usage").and_then(parse_anthropic_usage),
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        finish_reason: body
            .get("stop_reason")
            .and_then(|v| v.as_str())
            .map(normalize_stop_reason),
    })
}

fn parse_anthropic_usage(v: &Value) -> Option<Usage> {
    let input = v.get("input_tokens")?.as_u64()? as u32;
    let output = v.get("output_tokens")?.as_u64()? as u32;
    Some(Usage::new(input, output))
}

// ── SSE ─────────────────────────────────────────────────────────────

/// Usage is split across `message_start` (input) and `message_delta`
/// (output), so it is carried between events.
#[derive(Default)]
struct StreamState {
    usage: Option<Usage>,
}

impl StreamState {
    fn parse(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };

        match v.get("type").and_then(|t| t.as_str()).unwrap_or("") {
            "message_start" => {
                self.usage = v
                    .get("message")
                    .and_then(|m| m.get("usage"))
                    .and_then(parse_anthropic_usage);
                Vec::new()
            }
            "content_block_delta" => {
                let delta = v.get("delta");
                let is_text = delta.and_then(|d| d.get("type")).and_then(|t| t.as_str())
                    == Some("text_delta");
                match delta.and_then(|d| d.get("text")).and_then(|t| t.as_str()) {
                    Some(text) if is_text && !text.is_empty() => vec![Ok(StreamEvent::Token {
                        text: text.to_string(),
                    })],
                    _ => Vec::new(),
                }
            }
            "message_delta" => {
                if let Some(output) = v
                    .get("usage")
                    .and_then(|u| u.get("output_tokens"))
                    .and_then(|o| o.as_u64())
                {
                    let prompt = self.usage.map(|u| u.prompt_tokens).unwrap_or(0);
                    self.usage = Some(Usage::new(prompt, output as u32));
                }
                match v
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(|s| s.as_str())
                {
                    Some(reason) => vec![Ok(StreamEvent::Done {
                        usage: self.usage,
                        finish_reason: Some(normalize_stop_reason(reason)),
                    })],
                    None => Vec::new(),
                }
            }
            "message_stop" => vec![Ok(StreamEvent::Done {
                usage: self.usage,
                finish_reason: Some("stop".into()),
            })],
            "error" => {
                let err = v.get("error");
                let kind = err.and_then(|e| e.get("type")).and_then(|t| t.as_str());
                let msg = err
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error")
                    .to_string();
                let e = match kind {
                    Some("overloaded_error") | Some("api_error") => Error::ProviderUnavailable(msg),
                    Some("rate_limit_error") => Error::RateLimited {
                        message: msg,
                        retry_after: None,
                    },
                    _ => Error::Unknown(msg),
                };
                vec![Err(e)]
            }
            // ping, content_block_start/stop
            _ => Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn send_completion(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        tracing::debug!(provider = %self.id, model = %req.model, "anthropic messages request");

        let resp = self.post(&build_messages_body(req, false)).await?;
        let resp_json: Value = resp.json().await.map_err(from_reqwest)?;
        parse_anthropic_response(&resp_json)
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn stream_completion(
        &self,
        req: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        tracing::debug!(provider = %self.id, model = %req.model, "anthropic stream request");

        let resp = self.post(&build_messages_body(req, true)).await?;
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

    #[test]
    fn system_lifted_and_same_role_turns_merged() {
        let req = CompletionRequest {
            model: "claude-3-opus-20240229".into(),
            messages: vec![
                ChatMessage::system("rule one"),
                ChatMessage::user("a"),
                ChatMessage::user("b"),
                ChatMessage::system("rule two"),
                ChatMessage::assistant("c"),
            ],
            temperature: 0.3,
            max_tokens: 256,
            correlation: Default::default(),
        };
        let body = build_messages_body(&req, false);
        assert_eq!(body["system"], "rule one\n\nrule two");
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0]["content"], "a\n\nb");
        assert_eq!(msgs[1]["role"], "assistant");
        assert_eq!(body["max_tokens"], 256);
    }

    #[test]
    fn parses_text_blocks_and_stop_reason() {
        let body = serde_json::json!({
            "model": "claude-2",
            "content": [{"type": "text", "text": "Hi "}, {"type": "text", "text": "there"}],
            "stop_reason": "max_tokens",
            "usage": {"input_tokens": 10, "output_tokens": 2}
        });
        let resp = parse_anthropic_response(&body).unwrap();
        assert_eq!(resp.content, "Hi there");
        assert_eq!(resp.finish_reason.as_deref(), Some("length"));
        assert_eq!(resp.usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn stream_sequence() {
        let mut st = StreamState::default();
        assert!(st
            .parse(r#"{"type":"message_start","message":{"usage":{"input_tokens":7,"output_tokens":0}}}"#)
            .is_empty());
        let ev = st.parse(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#,
        );
        assert!(matches!(&ev[0], Ok(StreamEvent::Token { text }) if text == "Hel"));

        let ev = st.parse(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":4}}"#,
        );
        match &ev[0] {
            Ok(StreamEvent::Done {
                usage: Some(u),
                finish_reason,
            }) => {
                assert_eq!(u.prompt_tokens, 7);
                assert_eq!(u.completion_tokens, 4);
                assert_eq!(finish_reason.as_deref(), Some("stop"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stream_overloaded_error_is_unavailable() {
        let mut st = StreamState::default();
        let ev = st.parse(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#);
        assert!(matches!(&ev[0], Err(Error::ProviderUnavailable(m)) if m == "Overloaded"));
    }
}
