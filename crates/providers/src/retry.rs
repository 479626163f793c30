use std::time::Duration;

use ag_domain::config::RetryConfig;
use ag_domain::error::Error;
use rand::Rng;

/// Bounded exponential backoff for transient provider errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total calls allowed, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            multiplier: cfg.multiplier,
            jitter: cfg.jitter.clamp(0.0, 1.0),
        }
    }

    /// A policy that never retries.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether a failure on call number `attempt` (1-based) may be retried.
    pub fn should_retry(&self, attempt: u32, err: &Error) -> bool {
        attempt < self.max_attempts && err.is_transient()
    }

    /// Backoff before the call following `attempt` (1-based).
    ///
    /// A provider `Retry-After` hint wins when it is longer, still capped
    /// at `max_delay`.
    pub fn delay_for(&self, attempt: u32, err: &Error) -> Duration {
        let computed = self.backoff(attempt);
        match err {
            Error::RateLimited {
                retry_after: Some(hint),
                ..
            } => computed.max(*hint).min(self.max_delay),
            _ => computed,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(30) as i32;
        let base_ms = self.base_delay.as_millis() as f64 * self.multiplier.powi(exp);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);

        let spread = capped_ms * self.jitter;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        let ms = (capped_ms + jitter).clamp(0.0, self.max_delay.as_millis() as f64);
        Duration::from_millis(ms as u64)
    }
}
