//! Lifecycle of a single provider call.

use std::fmt;

use ag_domain::error::{Error, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Sent,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CallState::Idle | CallState::Sent)
    }

    /// Terminal state for a call that ended in `err`.
    pub fn for_error(err: &Error) -> CallState {
        match err.kind() {
            ErrorKind::Timeout => CallState::TimedOut,
            ErrorKind::Cancelled => CallState::Cancelled,
            _ => CallState::Failed,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks one call through `Idle → Sent → {terminal}`.
///
/// Terminal states are final; transitions out of them are rejected.
#[derive(Debug)]
pub struct ProviderCall {
    attempt: u32,
    state: CallState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid call transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: CallState,
    pub to: CallState,
}

impl ProviderCall {
    pub fn new(attempt: u32) -> Self {
        Self {
            attempt,
            state: CallState::Idle,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn transition(&mut self, to: CallState) -> Result<(), InvalidTransition> {
        let ok = match (self.state, to) {
            (CallState::Idle, CallState::Sent) => true,
            // A call cancelled before it left can skip `Sent`.
            (CallState::Idle, CallState::Cancelled) => true,
            (CallState::Sent, next) => next.is_terminal(),
            _ => false,
        };
        if !ok {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::trace!(attempt = self.attempt, from = %self.state, to = %to, "provider call");
        self.state = to;
        Ok(())
    }
}
