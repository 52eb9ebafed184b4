use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ErrorKind;
use crate::types::config::{BackendConfig, Credential};

/// Per-call knobs layered over the backend configuration.
#[derive(Debug, Clone, Default)]
pub struct InvocationOptions {
    /// Overrides the config read timeout for this call only.
    pub timeout_override: Option<Duration>,
    /// Overrides the engine retry policy's attempt count for this call only.
    pub max_attempts_override: Option<u32>,
    /// Streaming is not implemented in this core; always false.
    pub stream: bool,
}

impl InvocationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts_override = Some(attempts);
        self
    }
}

/// One logical "run this prompt against this backend" call.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub request_id: String,
    pub config: BackendConfig,
    pub prompt: String,
    pub credential: Option<Credential>,
    pub options: InvocationOptions,
}

impl InvocationRequest {
    /// Effective read timeout: the per-call override, else the config value.
    pub fn read_timeout(&self) -> Duration {
        self.options.timeout_override.unwrap_or(self.config.read_timeout)
    }
}

/// Immutable value returned to every caller and stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub success: bool,
    pub content: Option<String>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub tokens_used: Option<u64>,
    pub elapsed_ms: u64,
}

impl InvocationResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            error_message: None,
            error_kind: None,
            tokens_used: None,
            elapsed_ms: 0,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: None,
            error_message: Some(message.into()),
            error_kind: Some(kind),
            tokens_used: None,
            elapsed_ms: 0,
        }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = Some(tokens);
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = elapsed.as_millis() as u64;
        self
    }

    /// Whether the retry controller may re-attempt after this result.
    /// Mirrors the rule for errors: transient kinds, or an API error whose
    /// message matches a transient-network phrase.
    pub fn is_retryable_failure(&self) -> bool {
        if self.success {
            return false;
        }
        match self.error_kind {
            Some(ErrorKind::Network) | Some(ErrorKind::Timeout) => true,
            Some(ErrorKind::Api) => self
                .error_message
                .as_deref()
                .map(crate::error::is_transient_message)
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Terminal outcome of an invocation as observed by callers and waiters.
///
/// Cancellation is distinct from failure so listeners and callers can tell
/// "the user aborted" apart from "the backend failed".
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    Completed(InvocationResult),
    Cancelled,
}

impl InvocationOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, InvocationOutcome::Cancelled)
    }

    pub fn result(&self) -> Option<&InvocationResult> {
        match self {
            InvocationOutcome::Completed(r) => Some(r),
            InvocationOutcome::Cancelled => None,
        }
    }

    pub fn into_result(self) -> Option<InvocationResult> {
        match self {
            InvocationOutcome::Completed(r) => Some(r),
            InvocationOutcome::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_result_shape() {
        let r = InvocationResult::ok("hello").with_tokens(12);
        assert!(r.success);
        assert_eq!(r.content.as_deref(), Some("hello"));
        assert!(r.error_kind.is_none());
        assert_eq!(r.tokens_used, Some(12));
    }

    #[test]
    fn test_failure_retryability() {
        assert!(InvocationResult::failure(ErrorKind::Timeout, "read timed out").is_retryable_failure());
        assert!(InvocationResult::failure(ErrorKind::Api, "connection reset by peer").is_retryable_failure());
        assert!(!InvocationResult::failure(ErrorKind::Api, "empty choices").is_retryable_failure());
        assert!(!InvocationResult::failure(ErrorKind::RateLimit, "cap hit").is_retryable_failure());
        assert!(!InvocationResult::ok("fine").is_retryable_failure());
    }

    #[test]
    fn test_timeout_override_wins() {
        let cfg = BackendConfig::new("c", crate::types::BackendKind::Local, "http://localhost:11434", "m");
        let req = InvocationRequest {
            request_id: "req-1".into(),
            config: cfg,
            prompt: "p".into(),
            credential: None,
            options: InvocationOptions::new().with_timeout(Duration::from_secs(5)),
        };
        assert_eq!(req.read_timeout(), Duration::from_secs(5));
    }
}
