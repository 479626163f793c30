//! Shared utility functions for provider adapters.

use std::time::Duration;

use ag_domain::config::AuthConfig;
use ag_domain::error::{AuthFailure, Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeouts map to [`Error::Timeout`], connection failures to
/// [`Error::ProviderUnavailable`], body decode failures to
/// [`Error::Unknown`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() {
        Error::ProviderUnavailable(e.to_string())
    } else {
        Error::Unknown(e.to_string())
    }
}

/// Read a non-success response and classify it.
pub(crate) async fn error_from_response(provider: &str, resp: reqwest::Response) -> Error {
    let status = resp.status().as_u16();
    let retry_after = parse_retry_after(resp.headers());
    let body = resp.text().await.unwrap_or_default();
    classify_status(provider, status, &body, retry_after)
}

/// Map an HTTP status plus body onto the error taxonomy.
pub(crate) fn classify_status(
    provider: &str,
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> Error {
    let message = format!("{provider}: HTTP {status} - {}", truncate(body, 512));
    let lower = body.to_ascii_lowercase();

    match status {
        401 => Error::auth(AuthFailure::InvalidKey, message),
        403 => Error::auth(AuthFailure::PermissionDenied, message),
        402 => Error::auth(AuthFailure::InsufficientQuota, message),
        // Quota exhaustion comes back as 429 on several providers but does
        // not clear by waiting.
        429 if is_quota_body(&lower) => Error::auth(AuthFailure::InsufficientQuota, message),
        429 => Error::RateLimited {
            message,
            retry_after,
        },
        400 | 413 if is_context_length_body(&lower) => Error::ContextOverflow(message),
        400 | 404 | 409 | 413 | 422 => Error::InvalidParameter {
            name: "request".into(),
            message,
        },
        408 => Error::Timeout(message),
        500..=599 => Error::ProviderUnavailable(message),
        _ => Error::Unknown(message),
    }
}

fn is_quota_body(lower: &str) -> bool {
    ["insufficient_quota", "insufficient balance", "billing", "exceeded your current quota"]
        .iter()
        .any(|hint| lower.contains(hint))
}

fn is_context_length_body(lower: &str) -> bool {
    ["context_length_exceeded", "context length", "too many tokens", "prompt is too long"]
        .iter()
        .any(|hint| lower.contains(hint))
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Resolve the API key from an [`AuthConfig`].
///
/// Precedence:
/// 1. `key` field (plaintext, warns)
/// 2. `env` field (reads environment variable)
/// 3. Error
pub fn resolve_api_key(auth: &AuthConfig) -> Result<String> {
    if let Some(ref key) = auth.key {
        tracing::warn!("API key loaded from plaintext config field 'key', prefer 'env'");
        return Ok(key.clone());
    }

    if let Some(ref env_var) = auth.env {
        return match std::env::var(env_var) {
            Ok(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(Error::auth(
                AuthFailure::MissingKey,
                format!("environment variable '{env_var}' not set or empty"),
            )),
        };
    }

    Err(Error::auth(
        AuthFailure::MissingKey,
        "no API key configured: set 'key' or 'env' in auth",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_domain::error::ErrorKind;

    #[test]
    fn status_classification() {
        let kind = |status, body: &str| classify_status("p", status, body, None).kind();
        assert_eq!(kind(401, ""), ErrorKind::AuthError);
        assert_eq!(kind(403, ""), ErrorKind::AuthError);
        assert_eq!(kind(429, "slow down"), ErrorKind::RateLimited);
        assert_eq!(kind(500, ""), ErrorKind::ProviderUnavailable);
        assert_eq!(kind(503, ""), ErrorKind::ProviderUnavailable);
        assert_eq!(kind(529, "overloaded"), ErrorKind::ProviderUnavailable);
        assert_eq!(kind(400, "bad temperature"), ErrorKind::InvalidParameter);
        assert_eq!(kind(404, "no such model"), ErrorKind::InvalidParameter);
        assert_eq!(kind(408, ""), ErrorKind::Timeout);
        assert_eq!(kind(418, "teapot"), ErrorKind::UnknownError);
    }

    #[test]
    fn quota_429_is_auth_not_rate_limit() {
        let err = classify_status(
            "openai",
            429,
            r#"{"error":{"code":"insufficient_quota"}}"#,
            None,
        );
        assert!(matches!(
            err,
            Error::Auth {
                reason: AuthFailure::InsufficientQuota,
                ..
            }
        ));
        assert!(!err.is_transient());
    }

    #[test]
    fn context_length_400_is_overflow() {
        let err = classify_status(
            "openai",
            400,
            r#"{"error":{"code":"context_length_exceeded"}}"#,
            None,
        );
        assert_eq!(err.kind(), ErrorKind::ContextOverflow);
    }

    #[test]
    fn rate_limit_keeps_retry_after() {
        let err = classify_status("p", 429, "", Some(Duration::from_secs(7)));
        match err {
            Error::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn retry_after_header_parsing() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "12".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));

        headers.insert(
            reqwest::header::RETRY_AFTER,
            "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap(),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo";
        assert_eq!(truncate(s, 2), "h");
        assert_eq!(truncate(s, 100), s);
    }

    #[test]
    fn resolve_api_key_plaintext() {
        let auth = AuthConfig {
            key: Some("sk-test-123".into()),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(&auth).unwrap(), "sk-test-123");
    }

    #[test]
    fn resolve_api_key_env_var() {
        let var_name = "AG_TEST_RESOLVE_ENV_KEY_1234";
        std::env::set_var(var_name, "env-secret-value");
        let auth = AuthConfig {
            env: Some(var_name.into()),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(&auth).unwrap(), "env-secret-value");
        std::env::remove_var(var_name);
    }

    #[test]
    fn resolve_api_key_env_var_missing() {
        let auth = AuthConfig {
            env: Some("AG_TEST_NONEXISTENT_VAR_8888".into()),
            ..Default::default()
        };
        let err = resolve_api_key(&auth).unwrap_err();
        assert!(err.to_string().contains("AG_TEST_NONEXISTENT_VAR_8888"));
        assert!(matches!(
            err,
            Error::Auth {
                reason: AuthFailure::MissingKey,
                ..
            }
        ));
    }

    #[test]
    fn resolve_api_key_no_config() {
        let err = resolve_api_key(&AuthConfig::default()).unwrap_err();
        assert!(err.to_string().contains("no API key configured"));
    }
}
