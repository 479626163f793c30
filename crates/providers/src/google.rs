//! Google Gemini client (`generateContent` / `streamGenerateContent`).
//!
//! Gemini names the assistant role `model` and takes system text as a
//! separate `systemInstruction`.

use crate::traits::{CompletionRequest, CompletionResponse, LlmProvider};
use crate::util::{error_from_response, from_reqwest, resolve_api_key};
use ag_domain::config::ProviderConfig;
use ag_domain::error::{Error, Result};
use ag_domain::message::Role;
use ag_domain::stream::{BoxStream, StreamEvent, Usage};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct GoogleProvider {
    id: String,
    base_url: String,
    api_key: String,
    streaming: bool,
    client: reqwest::Client,
}

impl GoogleProvider {
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

    fn generate_url(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }

    fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model
        )
    }

    /// The key travels in a header so it never shows up in URLs that end
    /// up in logs or error messages.
    async fn post(&self, url: &str, body: &Value) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
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

fn build_body(req: &CompletionRequest) -> Value {
    let mut system_parts: Vec<Value> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();

    for msg in &req.messages {
        let part = serde_json::json!({ "text": msg.content });
        match msg.role {
            Role::System => system_parts.push(part),
            Role::User => contents.push(serde_json::json!({ "role": "user", "parts": [part] })),
            Role::Assistant => {
                contents.push(serde_json::json!({ "role": "model", "parts": [part] }))
            }
        }
    }

    let mut body = serde_json::json!({
        "contents": contents,
        "generationConfig": {
            "temperature": req.temperature,
            "maxOutputTokens": req.max_tokens,
        },
    });
    if !system_parts.is_empty() {
        body["systemInstruction"] = serde_json::json!({ "parts": system_parts });
    }
    body
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn normalize_finish_reason(s: &str) -> String {
    match s {
        "STOP" => "stop".into(),
        "MAX_TOKENS" => "length".into(),
        other => other.to_lowercase(),
    }
}

fn candidate_text(candidate: &Value) -> String {
    candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default()
}

fn first_candidate(body: &Value) -> Result<&Value> {
    if let Some(c) = body
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
    {
        return Ok(c);
    }
    let blocked = body
        .get("promptFeedback")
        .and_then(|f| f.get("blockReason"))
        .and_then(|r| r.as_str());
    Err(match blocked {
        Some(reason) => Error::invalid("messages", format!("prompt blocked by provider: {reason}")),
        None => Error::Unknown("google: no candidates in response".into()),
    })
}

fn parse_gemini_response(body: &Value, model: &str) -> Result<CompletionResponse> {
    let candidate = first_candidate(body)?;
    Ok(CompletionResponse {
        content: candidate_text(candidate),
        usage: body.get("usageMetadata").and_then(parse_gemini_usage),
        model: body
            .get("modelVersion")
            .and_then(|v| v.as_str())
            .unwrap_or(model)
            .to_string(),
        finish_reason: candidate
            .get("finishReason")
            .and_then(|v| v.as_str())
            .map(normalize_finish_reason),
    })
}

fn parse_gemini_usage(v: &Value) -> Option<Usage> {
    let prompt = v.get("promptTokenCount")?.as_u64()? as u32;
    let completion = v
        .get("candidatesTokenCount")
        .and_then(|c| c.as_u64())
        .unwrap_or(0) as u32;
    Some(Usage::new(prompt, completion))
}

/// Each Gemini SSE chunk is a full `GenerateContentResponse` holding a
/// text fragment; the one carrying `finishReason` ends the stream.
fn parse_gemini_sse_data(data: &str) -> Vec<Result<StreamEvent>> {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let candidate = match first_candidate(&v) {
        Ok(c) => c,
        Err(e) => return vec![Err(e)],
    };

    let mut events = Vec::new();
    let text = candidate_text(candidate);
    if !text.is_empty() {
        events.push(Ok(StreamEvent::Token { text }));
    }
    if let Some(fr) = candidate.get("finishReason").and_then(|v| v.as_str()) {
        events.push(Ok(StreamEvent::Done {
            usage: v.get("usageMetadata").and_then(parse_gemini_usage),
            finish_reason: Some(normalize_finish_reason(fr)),
        }));
    }
    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for GoogleProvider {
    async fn send_completion(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        let url = self.generate_url(&req.model);
        tracing::debug!(provider = %self.id, url = %url, "gemini generate request");

        let resp = self.post(&url, &build_body(req)).await?;
        let resp_json: Value = resp.json().await.map_err(from_reqwest)?;
        parse_gemini_response(&resp_json, &req.model)
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn stream_completion(
        &self,
        req: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = self.stream_url(&req.model);
        tracing::debug!(provider = %self.id, url = %url, "gemini stream request");

        let resp = self.post(&url, &build_body(req)).await?;
        Ok(crate::sse::sse_response_stream(resp, parse_gemini_sse_data))
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
    fn body_maps_roles_and_generation_config() {
        let req = CompletionRequest {
            model: "gemini-pro".into(),
            messages: vec![
                ChatMessage::system("sys"),
                ChatMessage::user("q"),
                ChatMessage::assistant("a"),
            ],
            temperature: 0.5,
            max_tokens: 321,
            correlation: Default::default(),
        };
        let body = build_body(&req);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 321);
    }

    #[test]
    fn parses_candidates() {
        let body = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "Hi "}, {"text": "there"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6}
        });
        let resp = parse_gemini_response(&body, "gemini-pro").unwrap();
        assert_eq!(resp.content, "Hi there");
        assert_eq!(resp.model, "gemini-pro");
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.unwrap().total_tokens, 6);
    }

    #[test]
    fn blocked_prompt_is_invalid_parameter() {
        let body = serde_json::json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let err = parse_gemini_response(&body, "gemini-pro").unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }

    #[test]
    fn stream_chunk_with_finish_reason() {
        let ev = parse_gemini_sse_data(
            r#"{"candidates":[{"content":{"parts":[{"text":"end"}]},"finishReason":"MAX_TOKENS"}]}"#,
        );
        assert_eq!(ev.len(), 2);
        assert!(matches!(&ev[0], Ok(StreamEvent::Token { text }) if text == "end"));
        assert!(matches!(
            &ev[1],
            Ok(StreamEvent::Done { finish_reason: Some(r), .. }) if r == "length"
        ));
    }
}
