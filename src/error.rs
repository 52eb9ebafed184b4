use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure classification carried on every failed invocation result.
///
/// Cancellation is deliberately not a kind here: it is a distinct terminal
/// outcome ([`crate::types::InvocationOutcome::Cancelled`]), not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// DNS, connect, reset and EOF failures.
    Network,
    /// Connect or read timeout exceeded.
    Timeout,
    /// Non-2xx status, malformed/missing response fields, abnormal completion reason.
    Api,
    /// Caller-side quota exhausted.
    RateLimit,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network_error",
            ErrorKind::Timeout => "timeout_error",
            ErrorKind::Api => "api_error",
            ErrorKind::RateLimit => "rate_limit_error",
            ErrorKind::Unknown => "unknown_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unified error type for the invocation engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Terminal cancellation. Converted to a cancelled outcome at the engine
    /// boundary, never to a failed result.
    #[error("cancelled")]
    Cancelled,

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network(_) => ErrorKind::Network,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Api(_) => ErrorKind::Api,
            Error::RateLimit(_) => ErrorKind::RateLimit,
            Error::Config(_) | Error::Unknown(_) => ErrorKind::Unknown,
            Error::Cancelled => ErrorKind::Unknown,
        }
    }

    /// Whether the retry controller may re-attempt after this error.
    ///
    /// Network and timeout failures are transient by definition. API errors
    /// are retried only when the message matches a transient-network phrase
    /// (a reset or truncated read surfacing after a 2xx status line).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) | Error::Timeout(_) => true,
            Error::Api(msg) => is_transient_message(msg),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_connect() {
            Error::Network(e.to_string())
        } else if e.is_decode() {
            Error::Api(format!("malformed response body: {}", e))
        } else {
            Error::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Api(format!("malformed response JSON: {}", e))
    }
}

/// Phrase test for transient network failures reported as text.
///
/// Keep these rules simple and explainable; substring checks over a
/// lowercased message, same order the failures show up in the wild.
pub fn is_transient_message(message: &str) -> bool {
    let m = message.to_lowercase();
    m.contains("connection reset")
        || m.contains("connection refused")
        || m.contains("unexpected eof")
        || m.contains("unexpected end of file")
        || m.contains("end of stream")
        || m.contains("broken pipe")
        || m.contains("timeout")
        || m.contains("timed out")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::Network("dns".into()).kind(), ErrorKind::Network);
        assert_eq!(Error::Timeout("read".into()).kind(), ErrorKind::Timeout);
        assert_eq!(Error::Api("HTTP 500".into()).kind(), ErrorKind::Api);
        assert_eq!(Error::RateLimit("hourly cap".into()).kind(), ErrorKind::RateLimit);
        assert_eq!(Error::Unknown("?".into()).kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_network_and_timeout_are_retryable() {
        assert!(Error::Network("connection refused".into()).is_retryable());
        assert!(Error::Timeout("read timed out".into()).is_retryable());
    }

    #[test]
    fn test_api_retryable_only_on_transient_phrases() {
        assert!(Error::Api("Connection reset by peer".into()).is_retryable());
        assert!(Error::Api("unexpected EOF during chunked read".into()).is_retryable());
        assert!(!Error::Api("empty choices in response".into()).is_retryable());
        assert!(!Error::Api("HTTP 429: quota".into()).is_retryable());
    }

    #[test]
    fn test_rate_limit_not_retryable() {
        assert!(!Error::RateLimit("client-side limit".into()).is_retryable());
    }

    #[test]
    fn test_kind_serialization() {
        let s = serde_json::to_string(&ErrorKind::Network).unwrap();
        assert_eq!(s, "\"network\"");
    }
}
