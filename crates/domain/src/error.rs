use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shared error type used across all aggregator crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("unknown model '{model}' for provider '{provider}'")]
    UnknownModel { provider: String, model: String },

    #[error("invalid parameter {name}: {message}")]
    InvalidParameter { name: String, message: String },

    #[error("context overflow: {0}")]
    ContextOverflow(String),

    #[error("auth ({reason}): {message}")]
    Auth { reason: AuthFailure, message: String },

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Unknown(String),

    #[error("config: {0}")]
    Config(String),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn auth(reason: AuthFailure, message: impl Into<String>) -> Self {
        Self::Auth {
            reason,
            message: message.into(),
        }
    }

    /// Caller-facing classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownProvider(_) => ErrorKind::UnknownProvider,
            Self::UnknownModel { .. } => ErrorKind::UnknownModel,
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Self::ContextOverflow(_) => ErrorKind::ContextOverflow,
            Self::Auth { .. } => ErrorKind::AuthError,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            Self::Cancelled => ErrorKind::Cancelled,
            // Malformed provider payloads and local I/O surface as unknown.
            Self::Unknown(_) | Self::Config(_) | Self::Json(_) | Self::Io(_) => {
                ErrorKind::UnknownError
            }
        }
    }

    /// True for errors a bounded retry may recover from.
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

// ── ErrorKind ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownProvider,
    UnknownModel,
    InvalidParameter,
    ContextOverflow,
    AuthError,
    RateLimited,
    Timeout,
    ProviderUnavailable,
    Cancelled,
    UnknownError,
}

impl ErrorKind {
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Timeout | Self::ProviderUnavailable
        )
    }

    /// Rejected before any provider was contacted.
    pub fn is_validation(self) -> bool {
        matches!(
            self,
            Self::UnknownProvider
                | Self::UnknownModel
                | Self::InvalidParameter
                | Self::ContextOverflow
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownProvider => "unknown_provider",
            Self::UnknownModel => "unknown_model",
            Self::InvalidParameter => "invalid_parameter",
            Self::ContextOverflow => "context_overflow",
            Self::AuthError => "auth_error",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::Cancelled => "cancelled",
            Self::UnknownError => "unknown_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailure {
    InvalidKey,
    InsufficientQuota,
    PermissionDenied,
    MissingKey,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidKey => "invalid_key",
            Self::InsufficientQuota => "insufficient_quota",
            Self::PermissionDenied => "permission_denied",
            Self::MissingKey => "missing_key",
        };
        f.write_str(s)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DispatchError
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The error a caller of the dispatch engine sees: the underlying error
/// plus the routing context it happened in.
#[derive(thiserror::Error, Debug)]
#[error("{source}")]
pub struct DispatchError {
    /// `None` when the request was rejected before a provider was resolved.
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Provider calls issued (0 for validation failures).
    pub attempts: u32,
    #[source]
    pub source: Error,
}

impl DispatchError {
    pub fn new(source: Error) -> Self {
        Self {
            provider: None,
            model: None,
            attempts: 0,
            source,
        }
    }

    pub fn with_target(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    /// Whether the caller may safely resubmit the same request.
    pub fn retryable(&self) -> bool {
        self.source.is_transient()
    }

    pub fn message(&self) -> String {
        self.source.to_string()
    }

    /// Serializable view of this error.
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.message(),
            provider: self.provider.clone(),
            model: self.model.clone(),
            retryable: self.retryable(),
            attempts: self.attempts,
        }
    }
}

impl From<Error> for DispatchError {
    fn from(source: Error) -> Self {
        Self::new(source)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub retryable: bool,
    pub attempts: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
