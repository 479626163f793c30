//! Dispatch engine.
//!
//! Normalizes a chat request, picks the provider client, and runs the call
//! under the per-request timeout, bounded retry and caller cancellation.
//! Every failure leaves here as a [`DispatchError`].

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ag_domain::chat::{ChatRequest, ChatResponse, Correlation};
use ag_domain::config::LlmConfig;
use ag_domain::error::{DispatchError, Error, Result};
use ag_domain::message::Conversation;
use ag_domain::settings::UserSettings;
use ag_domain::stream::{BoxStream, StreamEvent, Usage};
use ag_domain::trace::TraceEvent;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::call::{CallState, ProviderCall};
use crate::clients::ProviderClients;
use crate::normalize::{normalize, NormalizedRequest};
use crate::registry::ProviderRegistry;
use crate::retry::RetryPolicy;
use crate::traits::{CompletionResponse, LlmProvider};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An open streamed reply.
///
/// `events` yields zero or more tokens and then exactly one terminal item:
/// `Ok(Done)` or `Err`. Nothing follows the terminal item.
pub struct ChatStream {
    pub provider: String,
    pub model: String,
    /// Calls it took to open the stream.
    pub attempts: u32,
    pub correlation: Correlation,
    pub events: BoxStream<'static, std::result::Result<StreamEvent, DispatchError>>,
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// Provider/model pair an attempt is aimed at, for errors and traces.
#[derive(Debug, Clone)]
struct Target {
    provider: String,
    model: String,
}

impl Target {
    fn error(&self, source: Error, attempts: u32) -> DispatchError {
        DispatchError::new(source)
            .with_target(&self.provider, &self.model)
            .with_attempts(attempts)
    }

    fn trace(&self, streaming: bool, attempts: u32, started: Instant, outcome: Outcome) {
        let (usage, error_kind) = match outcome {
            Outcome::Success(usage) => (usage, None),
            Outcome::Failure(kind) => (None, Some(kind)),
        };
        TraceEvent::LlmRequest {
            provider: self.provider.clone(),
            model: self.model.clone(),
            streaming,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
            prompt_tokens: usage.map(|u| u.prompt_tokens),
            completion_tokens: usage.map(|u| u.completion_tokens),
            error_kind,
        }
        .emit();
    }
}

enum Outcome {
    Success(Option<Usage>),
    /// Error kind.
    Failure(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stateless across calls; share it behind an `Arc` and call concurrently.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    clients: Arc<ProviderClients>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        clients: Arc<ProviderClients>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            clients,
            retry,
            timeout,
        }
    }

    pub fn from_config(
        config: &LlmConfig,
        registry: Arc<ProviderRegistry>,
        clients: Arc<ProviderClients>,
    ) -> Self {
        Self::new(
            registry,
            clients,
            RetryPolicy::from_config(&config.retry),
            Duration::from_millis(config.default_timeout_ms),
        )
    }

    /// Send a request and wait for the full reply.
    pub async fn send(
        &self,
        req: &ChatRequest,
        settings: Option<&UserSettings>,
        cancel: &CancellationToken,
    ) -> std::result::Result<ChatResponse, DispatchError> {
        let started = Instant::now();
        let (normalized, client, target) = self.prepare(req, settings)?;

        let result = self
            .with_retry(&target, cancel, || client.send_completion(&normalized.payload))
            .await;

        match result {
            Ok((resp, attempts)) => {
                target.trace(false, attempts, started, Outcome::Success(resp.usage));
                Ok(into_chat_response(resp, &target, &normalized, attempts, started))
            }
            Err(e) => {
                target.trace(false, e.attempts, started, Outcome::Failure(e.kind().to_string()));
                Err(e)
            }
        }
    }

    /// Open a streamed reply.
    ///
    /// Providers without streaming are called once in full and replayed as
    /// a single token followed by `Done`. Retry only covers opening the
    /// stream; a failure after the first event ends the stream.
    pub async fn stream(
        &self,
        req: &ChatRequest,
        settings: Option<&UserSettings>,
        cancel: CancellationToken,
    ) -> std::result::Result<ChatStream, DispatchError> {
        let started = Instant::now();
        let (normalized, client, target) = self.prepare(req, settings)?;
        let payload = &normalized.payload;

        let opened = if client.supports_streaming() {
            self.with_retry(&target, &cancel, || client.stream_completion(payload))
                .await
        } else {
            tracing::debug!(
                provider = %target.provider,
                "provider does not stream, replaying full response as one chunk"
            );
            self.with_retry(&target, &cancel, || client.send_completion(payload))
                .await
                .map(|(resp, attempts)| (single_chunk(resp), attempts))
        };

        let (inner, attempts) = match opened {
            Ok(v) => v,
            Err(e) => {
                target.trace(true, e.attempts, started, Outcome::Failure(e.kind().to_string()));
                return Err(e);
            }
        };

        Ok(ChatStream {
            provider: target.provider.clone(),
            model: target.model.clone(),
            attempts,
            correlation: payload.correlation.clone(),
            events: guard_stream(inner, target, attempts, self.timeout, cancel, started),
        })
    }

    /// Send a session's history under its defaults, layered over the
    /// user's own settings.
    pub async fn send_session(
        &self,
        conversation: &Conversation,
        user: Option<&UserSettings>,
        cancel: &CancellationToken,
    ) -> std::result::Result<ChatResponse, DispatchError> {
        let req = ChatRequest::new(conversation.messages().to_vec());
        let settings = conversation.settings_over(user);
        self.send(&req, Some(&settings), cancel).await
    }

    /// Streaming counterpart of [`Dispatcher::send_session`].
    pub async fn stream_session(
        &self,
        conversation: &Conversation,
        user: Option<&UserSettings>,
        cancel: CancellationToken,
    ) -> std::result::Result<ChatStream, DispatchError> {
        let req = ChatRequest {
            stream: true,
            ..ChatRequest::new(conversation.messages().to_vec())
        };
        let settings = conversation.settings_over(user);
        self.stream(&req, Some(&settings), cancel).await
    }

    // ── internals ───────────────────────────────────────────────────

    fn prepare(
        &self,
        req: &ChatRequest,
        settings: Option<&UserSettings>,
    ) -> std::result::Result<(NormalizedRequest, Arc<dyn LlmProvider>, Target), DispatchError>
    {
        let normalized = normalize(&self.registry, req, settings).map_err(|e| {
            let mut err = DispatchError::new(e);
            let settings_provider = settings.and_then(|s| s.default_provider.clone());
            err.provider = req.provider.clone().or_else(|| settings_provider.clone());
            err.model = req.model.clone().or_else(|| {
                settings
                    .filter(|_| err.provider == settings_provider)
                    .and_then(|s| s.default_model.clone())
            });
            err
        })?;

        let target = Target {
            provider: normalized.provider_id.clone(),
            model: normalized.model.id.clone(),
        };

        if normalized.dropped_messages > 0 {
            TraceEvent::HistoryTruncated {
                provider: target.provider.clone(),
                model: target.model.clone(),
                dropped: normalized.dropped_messages,
                kept: normalized.payload.messages.len(),
                budget_tokens: normalized.budget_tokens,
            }
            .emit();
        }

        let client = self.clients.get(&target.provider).ok_or_else(|| {
            target.error(
                Error::ProviderUnavailable(format!(
                    "provider '{}' has no initialized client (check its credentials)",
                    target.provider
                )),
                0,
            )
        })?;

        Ok((normalized, client, target))
    }

    /// Run `op` until it succeeds, fails permanently, exhausts the retry
    /// budget, or `cancel` fires. Returns the value and the calls made.
    async fn with_retry<T, F, Fut>(
        &self,
        target: &Target,
        cancel: &CancellationToken,
        mut op: F,
    ) -> std::result::Result<(T, u32), DispatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let mut call = ProviderCall::new(attempt);
            advance(&mut call, CallState::Sent);

            let err = match self.attempt(target, cancel, op()).await {
                Ok(value) => {
                    advance(&mut call, CallState::Succeeded);
                    return Ok((value, attempt));
                }
                Err(e) => e,
            };
            advance(&mut call, CallState::for_error(&err));

            if !self.retry.should_retry(attempt, &err) {
                return Err(target.error(err, attempt));
            }

            let delay = self.retry.delay_for(attempt, &err);
            tracing::warn!(
                provider = %target.provider,
                model = %target.model,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient provider error, retrying"
            );
            TraceEvent::LlmRetry {
                provider: target.provider.clone(),
                model: target.model.clone(),
                attempt,
                delay_ms: delay.as_millis() as u64,
                error_kind: err.kind().to_string(),
            }
            .emit();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(target.error(Error::Cancelled, attempt)),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// One provider call bounded by the timeout and the cancel token.
    /// Dropping `fut` on either aborts the in-flight request.
    async fn attempt<T>(
        &self,
        target: &Target,
        cancel: &CancellationToken,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            r = tokio::time::timeout(self.timeout, fut) => match r {
                Ok(r) => r,
                Err(_) => Err(Error::Timeout(format!(
                    "provider '{}' timed out after {}ms",
                    target.provider,
                    self.timeout.as_millis()
                ))),
            },
        }
    }
}

fn advance(call: &mut ProviderCall, to: CallState) {
    if let Err(e) = call.transition(to) {
        tracing::error!(attempt = call.attempt(), error = %e, "provider call state machine violated");
    }
}

fn into_chat_response(
    resp: CompletionResponse,
    target: &Target,
    normalized: &NormalizedRequest,
    attempts: u32,
    started: Instant,
) -> ChatResponse {
    ChatResponse {
        content: resp.content,
        provider: target.provider.clone(),
        model: target.model.clone(),
        latency_ms: started.elapsed().as_millis() as u64,
        usage: resp.usage,
        finish_reason: resp.finish_reason,
        attempts,
        correlation: normalized.payload.correlation.clone(),
    }
}

fn single_chunk(resp: CompletionResponse) -> BoxStream<'static, Result<StreamEvent>> {
    let events = vec![
        Ok(StreamEvent::Token { text: resp.content }),
        Ok(StreamEvent::Done {
            usage: resp.usage,
            finish_reason: resp.finish_reason.or_else(|| Some("stop".into())),
        }),
    ];
    Box::pin(futures_util::stream::iter(events))
}

/// Enforce the stream contract over a provider stream: each chunk must
/// arrive within `timeout`, cancellation ends it, it stops after the first
/// terminal item, and a missing `Done` is supplied.
fn guard_stream(
    mut inner: BoxStream<'static, Result<StreamEvent>>,
    target: Target,
    attempts: u32,
    timeout: Duration,
    cancel: CancellationToken,
    started: Instant,
) -> BoxStream<'static, std::result::Result<StreamEvent, DispatchError>> {
    let stream = async_stream::stream! {
        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                r = tokio::time::timeout(timeout, inner.next()) => r.map_err(|_| {
                    Error::Timeout(format!(
                        "provider '{}' sent nothing for {}ms",
                        target.provider,
                        timeout.as_millis()
                    ))
                }),
            };

            match next {
                Ok(Some(Ok(StreamEvent::Token { text }))) => {
                    yield Ok(StreamEvent::Token { text });
                }
                Ok(Some(Ok(StreamEvent::Done { usage, finish_reason }))) => {
                    yield Ok(StreamEvent::Done { usage, finish_reason });
                    break Outcome::Success(usage);
                }
                Ok(None) => {
                    yield Ok(StreamEvent::Done { usage: None, finish_reason: Some("stop".into()) });
                    break Outcome::Success(None);
                }
                Ok(Some(Err(e))) | Err(e) => {
                    let kind = e.kind().to_string();
                    yield Err(target.error(e, attempts));
                    break Outcome::Failure(kind);
                }
            }
        };
        target.trace(true, attempts, started, outcome);
    };
    Box::pin(stream)
}
