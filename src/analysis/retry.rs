//! Classification-driven retry loop.
//!
//! Wraps a fallible provider call. Every failure goes through the
//! classifier: non-retryable kinds stop immediately (retrying them only
//! burns quota), transient kinds wait and try again until the attempt budget
//! is spent. Context overflow is handed back at once as a retryable failure,
//! since resending the same payload cannot shrink it; the fallback
//! controller decides what to do next.
//!
//! The loop never talks to the progress channel. Callers observe attempts
//! through the `on_attempt_failed` callback.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::classifier::classify;
use super::error::{ErrorClassification, ErrorKind, Failure, ProviderError};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_wait: DEFAULT_BASE_WAIT,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_wait: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_wait,
        }
    }

    /// Exponential backoff for the given (1-based) attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_wait.saturating_mul(1u32 << exponent)
    }

    fn wait_for(&self, classification: &ErrorClassification, attempt: u32) -> Duration {
        classification
            .wait_hint
            .unwrap_or_else(|| self.backoff(attempt))
    }
}

/// A failed attempt, as reported to the caller.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_error: ErrorClassification,
    /// `None` when this failure ends the loop.
    pub next_wait: Option<Duration>,
}

/// Human readable progress detail for a failed attempt.
pub fn describe_attempt(attempt: &RetryAttempt) -> String {
    match attempt.next_wait {
        Some(wait) => format!(
            "{} (attempt {}/{}), retrying in {}s",
            attempt.last_error.kind,
            attempt.attempt,
            attempt.max_attempts,
            wait.as_secs()
        ),
        None => format!(
            "{} (attempt {}/{}), giving up",
            attempt.last_error.kind, attempt.attempt, attempt.max_attempts
        ),
    }
}

/// Run `operation` under `policy`.
///
/// `operation` receives the 1-based attempt number.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
    mut on_attempt_failed: impl FnMut(&RetryAttempt),
) -> Result<T, Failure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let error = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Operation succeeded on attempt {}/{}", attempt, max_attempts);
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        let classification = classify(&error);
        let final_attempt = attempt == max_attempts
            || !classification.retryable
            || classification.kind == ErrorKind::ContextOverflow;

        if final_attempt {
            warn!(
                "Attempt {}/{} failed with {} (giving up): {}",
                attempt, max_attempts, classification.kind, classification.detail
            );
            on_attempt_failed(&RetryAttempt {
                attempt,
                max_attempts,
                last_error: classification.clone(),
                next_wait: None,
            });
            return Err(Failure::from(classification));
        }

        let wait = policy.wait_for(&classification, attempt);
        warn!(
            "Attempt {}/{} failed with {}, retrying in {}s: {}",
            attempt,
            max_attempts,
            classification.kind,
            wait.as_secs(),
            classification.detail
        );
        on_attempt_failed(&RetryAttempt {
            attempt,
            max_attempts,
            last_error: classification,
            next_wait: Some(wait),
        });

        tokio::time::sleep(wait).await;
    }

    unreachable!("retry loop always returns on its final attempt")
}
