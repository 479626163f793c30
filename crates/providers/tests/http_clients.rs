//! Provider clients against a mock HTTP server.

use ag_domain::chat::Correlation;
use ag_domain::config::{AuthConfig, ModelConfig, ProviderConfig, ProviderKind};
use ag_domain::error::{AuthFailure, Error, ErrorKind};
use ag_domain::message::ChatMessage;
use ag_domain::stream::{StreamEvent, Usage};
use ag_providers::anthropic::AnthropicProvider;
use ag_providers::google::GoogleProvider;
use ag_providers::openai_compat::OpenAiCompatProvider;
use ag_providers::{CompletionRequest, LlmProvider};
use futures_util::StreamExt;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(model: &str) -> CompletionRequest {
    CompletionRequest {
        model: model.into(),
        messages: vec![ChatMessage::system("be brief"), ChatMessage::user("Hello")],
        temperature: 0.5,
        max_tokens: 64,
        correlation: Correlation::default(),
    }
}

fn provider_config(kind: ProviderKind, base_url: &str) -> ProviderConfig {
    ProviderConfig {
        id: "test".into(),
        kind,
        base_url: base_url.into(),
        auth: AuthConfig {
            env: None,
            key: Some("test-key".into()),
        },
        supports_streaming: None,
        supports_system_prompt: None,
        models: vec![ModelConfig::new("m", 8_192, 1_024)],
        canned: None,
    }
}

fn openai(server: &MockServer) -> OpenAiCompatProvider {
    OpenAiCompatProvider::new("openai", &server.uri(), "test-key".into(), true).unwrap()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// OpenAI-compatible
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn openai_parses_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"model": "gpt-3.5-turbo", "max_tokens": 64})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-3.5-turbo-0125",
            "choices": [{"message": {"role": "assistant", "content": "Hi there"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 9, "completion_tokens": 2, "total_tokens": 11}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resp = openai(&server)
        .send_completion(&request("gpt-3.5-turbo"))
        .await
        .unwrap();
    assert_eq!(resp.content, "Hi there");
    assert_eq!(resp.usage, Some(Usage::new(9, 2)));
    assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
}

#[tokio::test]
async fn openai_401_is_invalid_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("{\"error\":\"bad key\"}"))
        .mount(&server)
        .await;

    let err = openai(&server)
        .send_completion(&request("gpt-4"))
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::Auth { reason: AuthFailure::InvalidKey, .. }),
        "{err:?}"
    );
    assert!(!err.is_transient());
}

#[tokio::test]
async fn openai_429_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "3")
                .set_body_string("slow down"),
        )
        .mount(&server)
        .await;

    let err = openai(&server)
        .send_completion(&request("gpt-4"))
        .await
        .unwrap_err();
    match err {
        Error::RateLimited { retry_after, .. } => {
            assert_eq!(retry_after, Some(Duration::from_secs(3)))
        }
        other => panic!("expected rate limit, got {other:?}"),
    }
}

#[tokio::test]
async fn openai_quota_429_is_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"code": "insufficient_quota", "message": "You exceeded your current quota"}
        })))
        .mount(&server)
        .await;

    let err = openai(&server)
        .send_completion(&request("gpt-4"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Auth { reason: AuthFailure::InsufficientQuota, .. }
    ));
}

#[tokio::test]
async fn openai_503_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let err = openai(&server)
        .send_completion(&request("gpt-4"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
}

#[tokio::test]
async fn openai_streams_sse_chunks() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" there\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let stream = openai(&server)
        .stream_completion(&request("gpt-4"))
        .await
        .unwrap();
    let events: Vec<StreamEvent> = stream.map(|e| e.unwrap()).collect().await;

    let text: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Token { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "Hi there");
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Done { finish_reason: Some(r), .. }) if r == "stop"
    ));
}

#[tokio::test]
async fn unreachable_host_is_unavailable() {
    let provider =
        OpenAiCompatProvider::new("openai", "http://127.0.0.1:9", "k".into(), false).unwrap();
    let err = provider.send_completion(&request("gpt-4")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Anthropic
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn anthropic_lifts_system_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "system": "be brief",
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "claude-2.1",
            "content": [{"type": "text", "text": "Hello!"}],
            "stop_reason": "max_tokens",
            "usage": {"input_tokens": 12, "output_tokens": 3}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider =
        AnthropicProvider::from_config(&provider_config(ProviderKind::Anthropic, &server.uri()))
            .unwrap();
    let resp = provider.send_completion(&request("claude-2")).await.unwrap();
    assert_eq!(resp.content, "Hello!");
    assert_eq!(resp.finish_reason.as_deref(), Some("length"));
    assert_eq!(resp.usage, Some(Usage::new(12, 3)));
}

#[tokio::test]
async fn anthropic_403_is_permission_denied() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let provider =
        AnthropicProvider::from_config(&provider_config(ProviderKind::Anthropic, &server.uri()))
            .unwrap();
    let err = provider.send_completion(&request("claude-2")).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Auth { reason: AuthFailure::PermissionDenied, .. }
    ));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gemini
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn gemini_sends_key_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-pro:generateContent"))
        .and(header("x-goog-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Bonjour"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 1, "totalTokenCount": 5}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider =
        GoogleProvider::from_config(&provider_config(ProviderKind::Google, &server.uri())).unwrap();
    let resp = provider.send_completion(&request("gemini-pro")).await.unwrap();
    assert_eq!(resp.content, "Bonjour");
    assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
    assert_eq!(resp.usage, Some(Usage::new(4, 1)));
}

#[tokio::test]
async fn gemini_blocked_prompt_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        })))
        .mount(&server)
        .await;

    let provider =
        GoogleProvider::from_config(&provider_config(ProviderKind::Google, &server.uri())).unwrap();
    let err = provider.send_completion(&request("gemini-pro")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
}
