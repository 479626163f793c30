use serde::Serialize;

/// Structured trace events emitted by the routing core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    LlmRequest {
        provider: String,
        model: String,
        streaming: bool,
        attempts: u32,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
        /// `None` on success, otherwise the error kind.
        error_kind: Option<String>,
    },
    LlmRetry {
        provider: String,
        model: String,
        attempt: u32,
        delay_ms: u64,
        error_kind: String,
    },
    HistoryTruncated {
        provider: String,
        model: String,
        dropped: usize,
        kept: usize,
        budget_tokens: u32,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ag_event");
    }
}
