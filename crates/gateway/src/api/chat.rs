//! Chat endpoints.
//!
//! - `POST /v1/chat` returns the full response as JSON
//! - `POST /v1/chat/stream` sends SSE `token` events, then `done` or `error`
//!
//! Each request owns a cancellation token guarded by the handler future or
//! the SSE stream. When the client goes away axum drops that future or
//! stream, the guard fires and the in-flight provider call is aborted.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;
use tokio_util::sync::{CancellationToken, DropGuard};

use ag_domain::chat::ChatRequest;
use ag_domain::stream::StreamEvent;
use ag_providers::ChatStream;

use super::error::ApiError;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    /// When set, the user's stored settings supply missing fields.
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub request: ChatRequest,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Response, ApiError> {
    if body.request.stream {
        return open_stream(state, body).await;
    }

    let settings = state.effective_settings(body.user_id.as_deref()).await?;
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let resp = state
        .dispatcher
        .send(&body.request, Some(&settings), &cancel)
        .await?;

    tracing::debug!(
        provider = %resp.provider,
        model = %resp.model,
        attempts = resp.attempts,
        latency_ms = resp.latency_ms,
        "chat completed"
    );
    Ok(Json(resp).into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat/stream (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Response, ApiError> {
    open_stream(state, body).await
}

/// Failures before the first event (validation, auth, exhausted retries)
/// are plain JSON errors with a status code; later ones arrive as an
/// `error` event.
async fn open_stream(state: AppState, body: ChatBody) -> Result<Response, ApiError> {
    let settings = state.effective_settings(body.user_id.as_deref()).await?;
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let stream = state
        .dispatcher
        .stream(&body.request, Some(&settings), cancel)
        .await?;

    Ok(Sse::new(make_sse_stream(stream, guard))
        .keep_alive(KeepAlive::default())
        .into_response())
}

fn make_sse_stream(
    stream: ChatStream,
    _guard: DropGuard,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let ChatStream {
        provider,
        model,
        mut events,
        ..
    } = stream;

    async_stream::stream! {
        while let Some(item) = events.next().await {
            let event = match item {
                Ok(StreamEvent::Token { text }) => Event::default()
                    .event("token")
                    .data(serde_json::json!({ "text": text }).to_string()),
                Ok(StreamEvent::Done { usage, finish_reason }) => Event::default()
                    .event("done")
                    .data(
                        serde_json::json!({
                            "provider": provider,
                            "model": model,
                            "usage": usage,
                            "finish_reason": finish_reason,
                        })
                        .to_string(),
                    ),
                Err(e) => Event::default()
                    .event("error")
                    .data(serde_json::json!({ "error": e.body() }).to_string()),
            };
            yield Ok(event);
        }
        // _guard drops here; cancelling a finished call is a no-op.
    }
}
