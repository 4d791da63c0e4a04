//! Closed error taxonomy for the orchestration core.
//!
//! A recovery hint travels with the error, as a `thiserror` enum instead
//! of a freeform struct, so callers can match exhaustively on `ErrorKind`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed error taxonomy. Each variant maps to exactly one
/// `ErrorKind` via [`CoreError::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Timeout,
    Network,
    Validation,
    Resource,
    HierarchyViolation,
    Cancelled,
    ProviderUnavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "TIMEOUT",
            Self::Network => "NETWORK",
            Self::Validation => "VALIDATION",
            Self::Resource => "RESOURCE",
            Self::HierarchyViolation => "HIERARCHY_VIOLATION",
            Self::Cancelled => "CANCELLED",
            Self::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
        };
        write!(f, "{s}")
    }
}

/// A core error: a taxonomy kind plus a human message and whether the
/// caller should retry. `recoverable` tracks whether the *core* already
/// handled this internally versus something that had to surface to the
/// caller.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    pub recoverable: bool,
    pub retryable: bool,
    /// Optional actionable next step, surfaced to the caller under the
    /// synthetic `system` agent id.
    pub recovery: Option<String>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            recoverable: false,
            retryable: matches!(kind, ErrorKind::Network | ErrorKind::Resource),
            recovery: None,
        }
    }

    pub fn with_recovery(mut self, recovery: impl Into<String>) -> Self {
        self.recovery = Some(recovery.into());
        self
    }

    pub fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message).recoverable(true)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource, message)
    }

    pub fn hierarchy_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HierarchyViolation, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled").recoverable(true)
    }

    pub fn provider_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderUnavailable, message).recoverable(true)
    }

    /// Format as the synthetic `system` agent output line.
    pub fn as_system_line(&self) -> String {
        match &self.recovery {
            Some(hint) => format!("[system] {}: {} — {}", self.kind, self.message, hint),
            None => format!("[system] {}: {}", self.kind, self.message),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_line_includes_recovery_hint() {
        let err = CoreError::validation("score too low").with_recovery("lower minScore");
        assert_eq!(
            err.as_system_line(),
            "[system] VALIDATION: score too low — lower minScore"
        );
    }

    #[test]
    fn system_line_without_recovery() {
        let err = CoreError::cancelled();
        assert_eq!(err.as_system_line(), "[system] CANCELLED: operation cancelled");
    }

    #[test]
    fn kind_display_matches_taxonomy_names() {
        assert_eq!(ErrorKind::HierarchyViolation.to_string(), "HIERARCHY_VIOLATION");
        assert_eq!(ErrorKind::ProviderUnavailable.to_string(), "PROVIDER_UNAVAILABLE");
    }
}
