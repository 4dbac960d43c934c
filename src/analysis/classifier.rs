//! Provider error classification.
//!
//! Maps a raw [`ProviderError`] to an [`ErrorClassification`]. The status
//! code is taken from the explicit status field when present, otherwise it
//! is recovered from the message: provider SDKs tend to embed it as a
//! bracketed token (`[429 RESOURCE_EXHAUSTED]`), as a bare number, or only
//! as the gRPC status name.
//!
//! The decision table below is a contract with the provider's error
//! messages. Every row has a fixture in the tests; when the provider changes
//! its wording, a fixture should break before users see a misclassification.

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

use super::error::{ErrorClassification, ErrorKind, ProviderError};

/// Fixed wait for per-minute rate limits.
pub const RATE_LIMIT_WAIT: Duration = Duration::from_secs(30);
/// Fixed wait when the service reports itself overloaded.
pub const SERVICE_UNAVAILABLE_WAIT: Duration = Duration::from_secs(5);

const QUOTA_MARKERS: &[&str] = &["quota", "daily", "exhausted"];
const LEAK_MARKERS: &[&str] = &["leaked", "reported"];
const BILLING_MARKERS: &[&str] = &["billing", "region", "location", "precondition"];
const CAPACITY_MARKERS: &[&str] = &[
    "tokens",
    "token count",
    "token limit",
    "context length",
    "context_length",
    "context window",
    "too large",
    "exceeds",
    "payload size",
];

const GRPC_STATUS_CODES: &[(&str, u16)] = &[
    ("RESOURCE_EXHAUSTED", 429),
    ("PERMISSION_DENIED", 403),
    ("FAILED_PRECONDITION", 400),
    ("INVALID_ARGUMENT", 400),
    ("NOT_FOUND", 404),
    ("UNAVAILABLE", 503),
    ("DEADLINE_EXCEEDED", 504),
    ("INTERNAL", 500),
];

fn bracketed_code() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d{3})\b[^\]]*\]").expect("valid regex"))
}

fn bare_code() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(400|403|404|429|500|503|504)\b").expect("valid regex"))
}

/// Classify a raw provider error. Pure; never panics.
pub fn classify(error: &ProviderError) -> ErrorClassification {
    let message = error.message.to_lowercase();
    let status = resolve_status(error);
    let mentions = |markers: &[&str]| markers.iter().any(|m| message.contains(m));

    let (kind, wait_hint) = match status {
        Some(429) if mentions(QUOTA_MARKERS) => (ErrorKind::QuotaExhausted, None),
        Some(429) => (ErrorKind::RateLimited, Some(RATE_LIMIT_WAIT)),
        Some(403) if mentions(LEAK_MARKERS) => (ErrorKind::KeyLeaked, None),
        Some(403) => (ErrorKind::AuthError, None),
        Some(400) if mentions(BILLING_MARKERS) => (ErrorKind::BillingRequired, None),
        Some(400) => (ErrorKind::InvalidRequest, None),
        Some(404) => (ErrorKind::FileExpired, None),
        Some(500) => (ErrorKind::ServerError, None),
        Some(503) => (ErrorKind::ServiceUnavailable, Some(SERVICE_UNAVAILABLE_WAIT)),
        Some(504) => (ErrorKind::DeadlineExceeded, None),
        _ if mentions(CAPACITY_MARKERS) => (ErrorKind::ContextOverflow, None),
        _ => (ErrorKind::Unknown, None),
    };

    ErrorClassification {
        kind,
        retryable: is_retryable(kind),
        wait_hint,
        user_message: user_message(kind, &error.message),
        detail: error.message.clone(),
    }
}

/// Whether a raw message reads like a payload size/token limit violation.
pub fn mentions_capacity(message: &str) -> bool {
    let message = message.to_lowercase();
    CAPACITY_MARKERS.iter().any(|m| message.contains(m))
}

fn resolve_status(error: &ProviderError) -> Option<u16> {
    if let Some(status) = error.status {
        return Some(status);
    }

    let parse = |re: &Regex| {
        re.captures(&error.message)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u16>().ok())
    };

    parse(bracketed_code())
        .or_else(|| parse(bare_code()))
        .or_else(|| {
            GRPC_STATUS_CODES
                .iter()
                .find(|(name, _)| error.message.contains(name))
                .map(|(_, code)| *code)
        })
}

fn is_retryable(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::RateLimited
            | ErrorKind::ServerError
            | ErrorKind::ServiceUnavailable
            | ErrorKind::ContextOverflow
            | ErrorKind::Unknown
    )
}

fn user_message(kind: ErrorKind, raw: &str) -> String {
    match kind {
        ErrorKind::QuotaExhausted => "The API key's quota with the model provider is used up \
            (daily or project limit reached). Retrying now would only burn more quota. Wait for \
            the quota to reset (usually midnight Pacific time) or switch to a key on a paid \
            plan, then start the analysis again."
            .to_string(),
        ErrorKind::RateLimited => "The model provider is rate limiting this API key (per-minute \
            request or token limit). Wait a minute before starting another analysis."
            .to_string(),
        ErrorKind::KeyLeaked => "The configured API key was reported as leaked and has been \
            disabled by the provider. Create a new key, update it in the settings and revoke \
            the old one."
            .to_string(),
        ErrorKind::AuthError => "The model provider rejected the API key (invalid, restricted \
            or missing permissions). Check the key in the settings and make sure the \
            Generative Language API is enabled for its project."
            .to_string(),
        ErrorKind::BillingRequired => "The model provider requires billing for this request, or \
            the service is not available in your region. Enable billing on the key's project \
            or use a key from a supported region."
            .to_string(),
        ErrorKind::InvalidRequest => "The model provider rejected the request as invalid. \
            Retrying will not help; check that the recording's files are valid media and try \
            again with fewer attachments."
            .to_string(),
        ErrorKind::FileExpired => "The uploaded recording file expired or could not be found \
            on the provider. Start the analysis again to upload it afresh."
            .to_string(),
        ErrorKind::ServerError => "The model provider hit an internal error, which usually \
            means the request was too large. Smaller payloads were tried as well; try again \
            later or with a shorter recording."
            .to_string(),
        ErrorKind::ServiceUnavailable => "The model provider is temporarily overloaded. Try \
            again in a few minutes."
            .to_string(),
        ErrorKind::DeadlineExceeded => "The model provider timed out while processing this \
            recording. The same request is unlikely to succeed; try a shorter recording or \
            fewer screenshots."
            .to_string(),
        ErrorKind::ContextOverflow => "The recording is too large for the model's context \
            window, even with fewer screenshots. Try a shorter recording or trim the \
            transcript text."
            .to_string(),
        ErrorKind::Unknown => format!("The analysis failed with an unexpected provider error: {}", raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(message: &str) -> ProviderError {
        ProviderError::new(message)
    }

    // One fixture per decision table row.

    #[test]
    fn test_row_quota_exhausted() {
        let c = classify(&raw(
            "[GoogleGenerativeAI Error]: [429 Too Many Requests] You exceeded your current quota",
        ));
        assert_eq!(c.kind, ErrorKind::QuotaExhausted);
        assert!(!c.retryable);
        assert!(c.wait_hint.is_none());
    }

    #[test]
    fn test_row_quota_exhausted_from_grpc_token() {
        let c = classify(&raw("[429 RESOURCE_EXHAUSTED] Resource has been exhausted"));
        assert_eq!(c.kind, ErrorKind::QuotaExhausted);
    }

    #[test]
    fn test_row_rate_limited() {
        let c = classify(&ProviderError::with_status(429, "Too many requests per minute"));
        assert_eq!(c.kind, ErrorKind::RateLimited);
        assert!(c.retryable);
        assert_eq!(c.wait_hint, Some(RATE_LIMIT_WAIT));
    }

    #[test]
    fn test_row_key_leaked() {
        let c = classify(&ProviderError::with_status(
            403,
            "Your API key was reported as leaked. Please use another API key.",
        ));
        assert_eq!(c.kind, ErrorKind::KeyLeaked);
        assert!(!c.retryable);
        assert!(c.user_message.contains("new key"));
    }

    #[test]
    fn test_row_auth_error() {
        let c = classify(&raw("[403 Forbidden] Method doesn't allow unregistered callers"));
        assert_eq!(c.kind, ErrorKind::AuthError);
        assert!(!c.retryable);
    }

    #[test]
    fn test_row_billing_required() {
        let c = classify(&raw("[400 Bad Request] User location is not supported for the API use."));
        assert_eq!(c.kind, ErrorKind::BillingRequired);
        let c = classify(&raw("[400 FAILED_PRECONDITION] Gemini API free tier is not available"));
        assert_eq!(c.kind, ErrorKind::BillingRequired);
    }

    #[test]
    fn test_row_invalid_request() {
        let c = classify(&ProviderError::with_status(400, "Request contains an invalid argument."));
        assert_eq!(c.kind, ErrorKind::InvalidRequest);
        assert!(!c.retryable);
    }

    #[test]
    fn test_row_file_expired() {
        let c = classify(&raw("[404 Not Found] File files/abc123 is not found"));
        assert_eq!(c.kind, ErrorKind::FileExpired);
        assert!(!c.retryable);
    }

    #[test]
    fn test_row_server_error() {
        let c = classify(&raw("[500 Internal Server Error] An internal error has occurred"));
        assert_eq!(c.kind, ErrorKind::ServerError);
        assert!(c.retryable);
        assert!(c.wait_hint.is_none());
    }

    #[test]
    fn test_row_service_unavailable() {
        let c = classify(&ProviderError::with_status(503, "The model is overloaded."));
        assert_eq!(c.kind, ErrorKind::ServiceUnavailable);
        assert!(c.retryable);
        assert_eq!(c.wait_hint, Some(SERVICE_UNAVAILABLE_WAIT));
    }

    #[test]
    fn test_row_deadline_exceeded() {
        let c = classify(&raw("[504 Gateway Timeout] Deadline expired before operation could complete."));
        assert_eq!(c.kind, ErrorKind::DeadlineExceeded);
        assert!(!c.retryable);
    }

    #[test]
    fn test_row_context_overflow() {
        let c = classify(&raw("The input token count (1200000) exceeds the maximum number of tokens allowed"));
        assert_eq!(c.kind, ErrorKind::ContextOverflow);
        assert!(c.retryable);
        assert!(c.wait_hint.is_none());
    }

    #[test]
    fn test_row_unknown() {
        let c = classify(&raw("connection reset by peer"));
        assert_eq!(c.kind, ErrorKind::Unknown);
        assert!(c.retryable);
        assert!(c.user_message.contains("connection reset by peer"));
    }

    #[test]
    fn test_any_429_quota_message_is_quota_exhausted() {
        for message in [
            "429 quota exceeded",
            "Error 429: QUOTA limit hit",
            "quota for project reached (HTTP 429)",
        ] {
            let c = classify(&raw(message));
            assert_eq!(c.kind, ErrorKind::QuotaExhausted, "message: {}", message);
            assert!(!c.retryable);
        }
    }

    #[test]
    fn test_explicit_status_wins_over_message() {
        let c = classify(&ProviderError::with_status(503, "[429 quota] stale text"));
        assert_eq!(c.kind, ErrorKind::ServiceUnavailable);
    }

    #[test]
    fn test_service_unavailable_wait_differs_from_default_backoff() {
        let c = classify(&ProviderError::with_status(503, "overloaded"));
        assert_ne!(c.wait_hint, Some(crate::analysis::retry::DEFAULT_BASE_WAIT));
    }

    #[test]
    fn test_large_numbers_are_not_status_codes() {
        let c = classify(&raw("request exceeds 5000 tokens"));
        assert_eq!(c.kind, ErrorKind::ContextOverflow);
    }

    #[test]
    fn test_grpc_name_without_code() {
        let c = classify(&raw("got status UNAVAILABLE from backend"));
        assert_eq!(c.kind, ErrorKind::ServiceUnavailable);
    }

    #[test]
    fn test_mentions_capacity() {
        assert!(mentions_capacity("Request payload size exceeds the limit"));
        assert!(mentions_capacity("Too large"));
        assert!(!mentions_capacity("socket hang up"));
        assert!(!mentions_capacity("Invalid page size"));
        assert_eq!(classify(&raw("Invalid page size")).kind, ErrorKind::Unknown);
    }
}
