//! Error types shared by the analysis pipeline.
//!
//! `ProviderError` is the raw, unclassified failure coming back from the model
//! provider. `Failure` is the classified outcome that flows back up through
//! the retry engine, the fallback controller and the orchestrator.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Raw error reported by the model provider (HTTP status + message).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Failure taxonomy for provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    QuotaExhausted,
    RateLimited,
    KeyLeaked,
    AuthError,
    BillingRequired,
    InvalidRequest,
    FileExpired,
    ServerError,
    ServiceUnavailable,
    DeadlineExceeded,
    ContextOverflow,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuotaExhausted => "QUOTA_EXHAUSTED",
            Self::RateLimited => "RATE_LIMITED",
            Self::KeyLeaked => "KEY_LEAKED",
            Self::AuthError => "AUTH_ERROR",
            Self::BillingRequired => "BILLING_REQUIRED",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::FileExpired => "FILE_EXPIRED",
            Self::ServerError => "SERVER_ERROR",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::ContextOverflow => "CONTEXT_OVERFLOW",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Kinds the user has to act on; no amount of retrying or payload
    /// reduction changes the outcome.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            Self::QuotaExhausted
                | Self::AuthError
                | Self::KeyLeaked
                | Self::BillingRequired
                | Self::DeadlineExceeded
                | Self::FileExpired
                | Self::InvalidRequest
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured classification of a provider error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub wait_hint: Option<Duration>,
    pub user_message: String,
    /// The raw provider message the classification was derived from.
    pub detail: String,
}

/// Classified failure of a pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    /// Transient failure; retries were exhausted or a larger strategy may
    /// still be abandoned for a smaller one.
    #[error("{}", .0.user_message)]
    Retryable(ErrorClassification),
    /// Failure that no retry or fallback can fix.
    #[error("{}", .0.user_message)]
    Terminal(ErrorClassification),
}

impl Failure {
    pub fn classification(&self) -> &ErrorClassification {
        match self {
            Self::Retryable(c) | Self::Terminal(c) => c,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.classification().kind
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    pub fn user_message(&self) -> &str {
        &self.classification().user_message
    }
}

impl From<ErrorClassification> for Failure {
    fn from(classification: ErrorClassification) -> Self {
        if classification.retryable {
            Self::Retryable(classification)
        } else {
            Self::Terminal(classification)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classification(kind: ErrorKind, retryable: bool) -> ErrorClassification {
        ErrorClassification {
            kind,
            retryable,
            wait_hint: None,
            user_message: format!("{} happened", kind),
            detail: "raw".to_string(),
        }
    }

    #[test]
    fn test_failure_from_classification() {
        let failure = Failure::from(classification(ErrorKind::KeyLeaked, false));
        assert!(failure.is_terminal());
        assert_eq!(failure.kind(), ErrorKind::KeyLeaked);

        let failure = Failure::from(classification(ErrorKind::ServerError, true));
        assert!(!failure.is_terminal());
    }

    #[test]
    fn test_failure_displays_user_message() {
        let failure = Failure::Terminal(classification(ErrorKind::AuthError, false));
        assert_eq!(failure.to_string(), "AUTH_ERROR happened");
    }

    #[test]
    fn test_user_actionable_kinds() {
        assert!(ErrorKind::QuotaExhausted.is_user_actionable());
        assert!(ErrorKind::FileExpired.is_user_actionable());
        assert!(!ErrorKind::ContextOverflow.is_user_actionable());
        assert!(!ErrorKind::RateLimited.is_user_actionable());
        assert!(!ErrorKind::Unknown.is_user_actionable());
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::ServiceUnavailable).unwrap();
        assert_eq!(json, "\"SERVICE_UNAVAILABLE\"");
    }
}
