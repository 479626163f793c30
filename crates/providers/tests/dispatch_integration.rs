//! End-to-end dispatch through config-built registry and clients.
//!
//! Uses canned providers only, so no network or credentials are needed.

use std::sync::Arc;

use ag_domain::chat::ChatRequest;
use ag_domain::config::{
    AuthConfig, CannedConfig, LlmConfig, ModelConfig, ProviderConfig, ProviderKind,
};
use ag_domain::error::ErrorKind;
use ag_domain::message::ChatMessage;
use ag_domain::settings::UserSettings;
use ag_domain::stream::StreamEvent;
use ag_providers::{Dispatcher, ProviderClients, ProviderRegistry};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

fn canned(id: &str, models: Vec<ModelConfig>) -> ProviderConfig {
    ProviderConfig {
        id: id.into(),
        kind: ProviderKind::Canned,
        base_url: String::new(),
        auth: AuthConfig::default(),
        supports_streaming: None,
        supports_system_prompt: None,
        models,
        canned: Some(CannedConfig {
            delay_ms: 0,
            ..Default::default()
        }),
    }
}

fn dispatcher() -> Dispatcher {
    let cfg = LlmConfig {
        providers: vec![
            canned(
                "openai",
                vec![
                    ModelConfig::new("gpt-3.5-turbo", 16_385, 4_096),
                    ModelConfig::new("gpt-4", 8_192, 4_096),
                ],
            ),
            canned("anthropic", vec![ModelConfig::new("claude-2", 100_000, 4_096)]),
        ],
        ..Default::default()
    };
    let registry = ProviderRegistry::from_config(&cfg).unwrap();
    let clients = ProviderClients::from_config(&cfg).unwrap();
    Dispatcher::from_config(&cfg, Arc::new(registry), Arc::new(clients))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Buffered
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn explicit_target_wins() {
    let d = dispatcher();
    let req = ChatRequest::new(vec![ChatMessage::user("Hello")]).with_target("anthropic", "claude-2");

    let resp = d.send(&req, None, &CancellationToken::new()).await.unwrap();
    assert_eq!(resp.provider, "anthropic");
    assert_eq!(resp.model, "claude-2");
    assert_eq!(resp.content, "Claude 2 here with a mock response to: \"Hello\"");
    assert_eq!(resp.attempts, 1);
}

#[tokio::test]
async fn settings_supply_missing_target() {
    let d = dispatcher();
    let settings = UserSettings {
        default_provider: Some("openai".into()),
        default_model: Some("gpt-4".into()),
        assistant_id: Some("asst_1".into()),
        ..Default::default()
    };
    let req = ChatRequest::new(vec![ChatMessage::user("What is Rust?")]);

    let resp = d
        .send(&req, Some(&settings), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resp.provider, "openai");
    assert_eq!(resp.model, "gpt-4");
    assert!(resp.content.contains("What is Rust?"));
    assert_eq!(resp.correlation.assistant_id.as_deref(), Some("asst_1"));
}

#[tokio::test]
async fn unknown_model_is_rejected_before_dispatch() {
    let d = dispatcher();
    let req = ChatRequest::new(vec![ChatMessage::user("Hello")]).with_target("openai", "gpt-9");

    let err = d.send(&req, None, &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownModel);
    assert_eq!(err.attempts, 0);
    assert!(!err.retryable());
}

#[tokio::test]
async fn empty_history_is_rejected() {
    let d = dispatcher();
    let req = ChatRequest::new(vec![]).with_target("openai", "gpt-4");

    let err = d.send(&req, None, &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
}

#[tokio::test]
async fn concurrent_requests_are_independent() {
    let d = Arc::new(dispatcher());
    let mut handles = Vec::new();
    for i in 0..8 {
        let d = Arc::clone(&d);
        handles.push(tokio::spawn(async move {
            let req = ChatRequest::new(vec![ChatMessage::user(format!("msg {i}"))])
                .with_target("openai", "gpt-3.5-turbo");
            d.send(&req, None, &CancellationToken::new()).await
        }));
    }
    for (i, h) in handles.into_iter().enumerate() {
        let resp = h.await.unwrap().unwrap();
        assert!(resp.content.contains(&format!("msg {i}")));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn canned_stream_is_one_token_then_done() {
    let d = dispatcher();
    let req = ChatRequest::new(vec![ChatMessage::user("Hi")]).with_target("openai", "gpt-4");

    let stream = d.stream(&req, None, CancellationToken::new()).await.unwrap();
    assert_eq!(stream.provider, "openai");
    let events: Vec<_> = stream.events.collect().await;

    assert_eq!(events.len(), 2);
    match &events[0] {
        Ok(StreamEvent::Token { text }) => assert!(text.contains("GPT-4")),
        other => panic!("expected token, got {other:?}"),
    }
    assert!(matches!(events[1], Ok(StreamEvent::Done { .. })));
}
