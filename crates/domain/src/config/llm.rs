use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider system
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Upper bound for a single provider call, and for the gap between
    /// stream chunks.
    #[serde(default = "d_30000u")]
    pub default_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Startup policy for LLM providers.
    ///
    /// - `allow_none` (default): the gateway boots even if zero provider
    ///   clients init; chat endpoints return `provider_unavailable` until
    ///   credentials are configured.
    /// - `require_one`: abort startup if no provider client initializes.
    #[serde(default)]
    pub startup_policy: LlmStartupPolicy,
    /// Provider catalog. Omitting the key yields the built-in catalog
    /// (openai, anthropic, google, mistral).
    #[serde(default = "d_providers")]
    pub providers: Vec<ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            retry: RetryConfig::default(),
            startup_policy: LlmStartupPolicy::AllowNone,
            providers: d_providers(),
        }
    }
}

/// Controls how the gateway handles provider client initialization at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LlmStartupPolicy {
    /// Boot even if no provider clients initialize.
    /// Init errors are reported in `/v1/models/readiness`.
    #[default]
    AllowNone,
    /// Abort startup if no provider client initializes.
    RequireOne,
}

/// Bounded retry for transient provider errors.
///
/// `max_attempts` counts the first call, so the default of 1 means no retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "d_1")]
    pub max_attempts: u32,
    #[serde(default = "d_250u")]
    pub base_delay_ms: u64,
    #[serde(default = "d_8000u")]
    pub max_delay_ms: u64,
    #[serde(default = "d_multiplier")]
    pub multiplier: f64,
    /// Fractional jitter applied to each delay (0.25 = ±25%).
    #[serde(default = "d_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 250,
            max_delay_ms: 8_000,
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    /// Empty means the kind's public endpoint.
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Overrides the kind's streaming support.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_streaming: Option<bool>,
    /// Overrides the kind's system prompt support.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_system_prompt: Option<bool>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    /// Only read by `kind = "canned"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canned: Option<CannedConfig>,
}

impl ProviderConfig {
    pub fn effective_base_url(&self) -> &str {
        if self.base_url.is_empty() {
            self.kind.default_base_url()
        } else {
            &self.base_url
        }
    }

    pub fn streaming(&self) -> bool {
        self.supports_streaming
            .unwrap_or_else(|| self.kind.streams_by_default())
    }

    pub fn system_prompt(&self) -> bool {
        self.supports_system_prompt.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompat,
    Anthropic,
    Google,
    /// Offline provider that answers from a response table.
    Canned,
}

impl ProviderKind {
    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::OpenaiCompat => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::Google => "https://generativelanguage.googleapis.com",
            ProviderKind::Canned => "",
        }
    }

    pub fn streams_by_default(self) -> bool {
        !matches!(self, ProviderKind::Canned)
    }

    pub fn needs_api_key(self) -> bool {
        !matches!(self, ProviderKind::Canned)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Env var containing the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    /// Direct key (for config-only setups; prefer env).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    /// Name sent on the wire when it differs from `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_model: Option<String>,
    #[serde(default = "d_context_window")]
    pub context_window_tokens: u32,
    #[serde(default = "d_max_output")]
    pub max_output_tokens: u32,
    #[serde(default = "d_default_max_tokens")]
    pub default_max_tokens: u32,
    #[serde(default)]
    pub temperature: TemperatureRange,
}

impl ModelConfig {
    pub fn new(id: &str, context_window_tokens: u32, max_output_tokens: u32) -> Self {
        Self {
            id: id.into(),
            api_model: None,
            context_window_tokens,
            max_output_tokens,
            default_max_tokens: d_default_max_tokens(),
            temperature: TemperatureRange::default(),
        }
    }

    fn with_api_model(mut self, api_model: &str) -> Self {
        self.api_model = Some(api_model.into());
        self
    }
}

/// Allowed sampling temperature for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureRange {
    #[serde(default)]
    pub min: f32,
    #[serde(default = "d_temp_max")]
    pub max: f32,
    #[serde(default = "d_temp_default")]
    pub default: f32,
}

impl Default for TemperatureRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            default: 0.7,
        }
    }
}

impl TemperatureRange {
    pub fn contains(&self, t: f32) -> bool {
        t.is_finite() && t >= self.min && t <= self.max
    }
}

/// Response table for the canned provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CannedConfig {
    /// Artificial latency before answering.
    #[serde(default = "d_1000u")]
    pub delay_ms: u64,
    /// Model id → response template. `{message}` expands to the last
    /// user message, `{provider}` and `{model}` to the routing target.
    #[serde(default)]
    pub responses: HashMap<String, String>,
    /// Used for models without an entry in `responses`.
    #[serde(default = "d_fallback_template")]
    pub fallback: String,
}

impl Default for CannedConfig {
    fn default() -> Self {
        Self {
            delay_ms: 1_000,
            responses: HashMap::new(),
            fallback: d_fallback_template(),
        }
    }
}

// ── built-in catalog ────────────────────────────────────────────────

fn provider(id: &str, kind: ProviderKind, env: &str, models: Vec<ModelConfig>) -> ProviderConfig {
    ProviderConfig {
        id: id.into(),
        kind,
        base_url: String::new(),
        auth: AuthConfig {
            env: Some(env.into()),
            key: None,
        },
        supports_streaming: None,
        supports_system_prompt: None,
        models,
        canned: None,
    }
}

fn d_providers() -> Vec<ProviderConfig> {
    let mut mistral = provider(
        "mistral",
        ProviderKind::OpenaiCompat,
        "MISTRAL_API_KEY",
        vec![
            ModelConfig::new("mistral-small", 32_000, 4_096).with_api_model("mistral-small-latest"),
            ModelConfig::new("mistral-medium", 32_000, 4_096).with_api_model("mistral-medium-latest"),
            ModelConfig::new("mistral-large", 128_000, 4_096).with_api_model("mistral-large-latest"),
        ],
    );
    mistral.base_url = "https://api.mistral.ai/v1".into();

    vec![
        provider(
            "openai",
            ProviderKind::OpenaiCompat,
            "OPENAI_API_KEY",
            vec![
                ModelConfig::new("gpt-3.5-turbo", 16_385, 4_096),
                ModelConfig::new("gpt-4", 8_192, 4_096),
                ModelConfig::new("gpt-4-turbo", 128_000, 4_096),
            ],
        ),
        provider(
            "anthropic",
            ProviderKind::Anthropic,
            "ANTHROPIC_API_KEY",
            vec![
                ModelConfig::new("claude-2", 100_000, 4_096),
                ModelConfig::new("claude-3-opus", 200_000, 4_096)
                    .with_api_model("claude-3-opus-20240229"),
                ModelConfig::new("claude-3-sonnet", 200_000, 4_096)
                    .with_api_model("claude-3-sonnet-20240229"),
            ],
        ),
        provider(
            "google",
            ProviderKind::Google,
            "GOOGLE_API_KEY",
            vec![
                ModelConfig::new("gemini-pro", 32_768, 8_192),
                ModelConfig::new("gemini-ultra", 32_768, 8_192),
            ],
        ),
        mistral,
    ]
}

// ── serde default helpers ───────────────────────────────────────────

fn d_30000u() -> u64 {
    30_000
}
fn d_1000u() -> u64 {
    1_000
}
fn d_250u() -> u64 {
    250
}
fn d_8000u() -> u64 {
    8_000
}
fn d_1() -> u32 {
    1
}
fn d_multiplier() -> f64 {
    2.0
}
fn d_jitter() -> f64 {
    0.25
}
fn d_context_window() -> u32 {
    8_192
}
fn d_max_output() -> u32 {
    4_096
}
fn d_default_max_tokens() -> u32 {
    1_000
}
fn d_temp_max() -> f32 {
    1.0
}
fn d_temp_default() -> f32 {
    0.7
}
fn d_fallback_template() -> String {
    "Response from {provider}'s {model}: I processed your message \"{message}\"".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
