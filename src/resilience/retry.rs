//! Bounded exponential-backoff retry around one logical backend call.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Error;
use crate::types::InvocationResult;
use crate::Result;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Delay before re-attempting after failure number `attempt` (1-based).
    /// Starts at `initial_delay`, multiplies per attempt, capped at
    /// `max_delay`; the sequence is non-decreasing.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial_delay.as_millis() as f64 * factor;
        let capped = delay.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Run `op` with bounded retry.
///
/// `op` receives the 1-based attempt number. A retry happens when the
/// attempt errs with a retryable kind, or returns a failed result whose
/// kind is retryable under the same rule. Non-retryable failures and
/// exhausted attempts are converted to a failed [`InvocationResult`] — the
/// only `Err` this function produces is [`Error::Cancelled`].
pub async fn run_with_retry<F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<InvocationResult>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<InvocationResult>>,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let attempt_result = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            r = op(attempt) => r,
        };

        let failure = match attempt_result {
            Ok(result) if result.success => return Ok(result),
            Ok(result) => result,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => InvocationResult::failure(e.kind(), e.to_string()),
        };

        let retryable = failure.is_retryable_failure();
        if !retryable || attempt == max_attempts {
            if retryable {
                debug!(attempt, "retry attempts exhausted");
            }
            return Ok(failure);
        }

        let delay = policy.delay_for_attempt(attempt);
        debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = failure.error_message.as_deref().unwrap_or(""),
            "transient failure; backing off before retry"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }

    // Loop always returns from within; max_attempts >= 1.
    Err(Error::Unknown("retry loop exited without outcome".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(max_attempts)
            .with_initial_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(20))
    }

    #[test]
    fn test_delay_sequence_non_decreasing_and_capped() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350))
            .with_multiplier(2.0);

        let delays: Vec<u64> = (1..=5).map(|a| policy.delay_for_attempt(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 350, 350, 350]);
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[tokio::test]
    async fn test_retryable_failure_exhausts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let cancel = CancellationToken::new();

        let out = run_with_retry(&fast_policy(3), &cancel, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(crate::Error::Timeout("read timed out".into()))
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!out.success);
        assert_eq!(out.error_kind, Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_non_retryable_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let cancel = CancellationToken::new();

        let out = run_with_retry(&fast_policy(5), &cancel, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(crate::Error::Api("missing content field".into()))
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!out.success);
        assert_eq!(out.error_kind, Some(ErrorKind::Api));
    }

    #[tokio::test]
    async fn test_retryable_result_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let cancel = CancellationToken::new();

        let out = run_with_retry(&fast_policy(3), &cancel, move |attempt| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Ok(InvocationResult::failure(ErrorKind::Network, "connection reset"))
                } else {
                    Ok(InvocationResult::ok("made it"))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(out.success);
        assert_eq!(out.content.as_deref(), Some("made it"));
    }

    #[tokio::test]
    async fn test_cancellation_abandons_attempt() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let c = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            c.cancel();
        });

        let out = run_with_retry(&fast_policy(3), &cancel, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(InvocationResult::ok("never"))
            }
        })
        .await;

        assert!(matches!(out, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_during_backoff_stops_retries() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let policy = RetryPolicy::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_millis(200));

        let c = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            c.cancel();
        });

        let out = run_with_retry(&policy, &cancel, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(crate::Error::Network("connection refused".into()))
            }
        })
        .await;

        assert!(matches!(out, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
