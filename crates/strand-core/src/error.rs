// crates/strand-core/src/error.rs

//! Error codes and classification shared across the system
//!
//! Error codes are plain strings carried on `OperationResult.error_code`
//! and surfaced into events and metrics. Adapters use the classification
//! helpers here to decide whether a provider error is worth retrying.

use thiserror::Error;

/// Well-known error codes surfaced on `OperationResult.error_code`.
pub mod codes {
    /// Adapter-rejected input (missing field, wrong shape).
    pub const INVALID_INPUT: &str = "INVALID_INPUT";
    /// Adapter was dispatched a capability it does not serve.
    pub const UNSUPPORTED_CAPABILITY: &str = "UNSUPPORTED_CAPABILITY";
    /// Provider call exceeded the step timeout.
    pub const TIMEOUT: &str = "TIMEOUT";
    /// Uncaught failure inside the adapter execution path.
    pub const EXCEPTION: &str = "EXCEPTION";
    /// Registry returned an empty fallback chain.
    pub const NO_PROVIDERS: &str = "NO_PROVIDERS";
    /// Retry policy exhausted with no success.
    pub const MAX_RETRIES: &str = "MAX_RETRIES";
    pub const RATE_LIMIT: &str = "RATE_LIMIT";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    /// Execution was cancelled from outside.
    pub const CANCELLED: &str = "CANCELLED";
}

/// A provider call failure, classified for the fallback logic.
///
/// Adapters build one of these internally and convert it into a failed
/// `OperationResult` at the dispatch boundary; it never escapes an adapter
/// as an `Err`.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProviderCallError {
    pub message: String,
    pub code: Option<String>,
    pub retryable: bool,
}

impl ProviderCallError {
    /// Classify an HTTP status code from a provider response.
    pub fn from_status(status: u16, body: &str) -> Self {
        let (code, retryable) = classify_status(status);
        Self {
            message: format!("provider returned {status}: {body}"),
            code: Some(code.to_string()),
            retryable,
        }
    }

    /// Transport-level failure (connect, timeout, TLS). Retryable.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(codes::EXCEPTION.to_string()),
            retryable: true,
        }
    }

    /// Input the adapter refused to send. Not retryable.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(codes::INVALID_INPUT.to_string()),
            retryable: false,
        }
    }

    /// Malformed or unexpected provider response. Not retryable.
    pub fn response_parse(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(codes::EXCEPTION.to_string()),
            retryable: false,
        }
    }
}

impl From<reqwest::Error> for ProviderCallError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), &err.to_string());
        }
        Self::transport(err.to_string())
    }
}

/// Map an HTTP status to an error code and retryability.
///
/// 429 and 5xx are transient; auth failures and other 4xx are not.
pub fn classify_status(status: u16) -> (&'static str, bool) {
    match status {
        429 => (codes::RATE_LIMIT, true),
        401 | 403 => (codes::UNAUTHORIZED, false),
        400..=499 => (codes::INVALID_INPUT, false),
        500..=599 => (codes::SERVICE_UNAVAILABLE, true),
        _ => (codes::EXCEPTION, true),
    }
}

/// Substring heuristic over a provider error message.
///
/// Used when a provider reports failure without a usable status code.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    const TRANSIENT: [&str; 9] = [
        "timeout",
        "timed out",
        "rate limit",
        "too many requests",
        "service unavailable",
        "overloaded",
        "connection",
        "temporar",
        "retry",
    ];
    TRANSIENT.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(429), (codes::RATE_LIMIT, true));
        assert_eq!(classify_status(401), (codes::UNAUTHORIZED, false));
        assert_eq!(classify_status(422), (codes::INVALID_INPUT, false));
        assert_eq!(classify_status(503), (codes::SERVICE_UNAVAILABLE, true));
        assert_eq!(classify_status(529), (codes::SERVICE_UNAVAILABLE, true));
    }

    #[test]
    fn message_classification() {
        assert!(is_retryable_message("Request timed out after 30s"));
        assert!(is_retryable_message("429 Too Many Requests"));
        assert!(is_retryable_message("model overloaded, please retry"));
        assert!(!is_retryable_message("invalid api key"));
        assert!(!is_retryable_message("missing required field: audio"));
    }
}
