use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::ModelBackend;
use crate::cache::{CacheKey, CacheStore};
use crate::dedup::{DedupCoordinator, Joined};
use crate::error::Error;
use crate::lifecycle::{InvocationListener, LifecycleTracker};
use crate::resilience::rate_limiter::{bucket_key, RateLimiter};
use crate::resilience::retry::{run_with_retry, RetryPolicy};
use crate::types::{
    BackendConfig, Credential, InvocationOptions, InvocationOutcome, InvocationRequest,
    InvocationResult,
};
use crate::Result;

/// How the engine consults the (advisory) rate limiter before an owned call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitMode {
    /// Do not gate on the limiter at all.
    #[default]
    Disabled,
    /// Refuse immediately with a rate-limit failure when no token is available.
    Reject,
    /// Back off until a token is available (cancellable).
    Wait,
}

/// One logical invocation path: lifecycle id → cache probe → dedup →
/// rate gate → retry → backend → cache fill → group release → notify.
///
/// All collaborators are explicit objects passed in at construction; the
/// engine holds no process-wide state.
pub struct InvocationEngine {
    pub(crate) cache: Arc<CacheStore>,
    pub(crate) dedup: Arc<DedupCoordinator>,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) rate_limit_mode: RateLimitMode,
    pub(crate) retry: RetryPolicy,
    pub(crate) lifecycle: Arc<LifecycleTracker>,
    pub(crate) backend: Arc<dyn ModelBackend>,
}

impl InvocationEngine {
    pub fn builder() -> super::builder::EngineBuilder {
        super::builder::EngineBuilder::new()
    }

    /// Assign an identity to a logical call. The id is how callers cancel.
    pub fn new_request(
        &self,
        config: BackendConfig,
        prompt: impl Into<String>,
        credential: Option<Credential>,
        options: InvocationOptions,
    ) -> InvocationRequest {
        InvocationRequest {
            request_id: self.lifecycle.next_request_id(),
            config,
            prompt: prompt.into(),
            credential,
            options,
        }
    }

    /// Convenience wrapper: build a request and run it.
    pub async fn invoke(
        &self,
        config: BackendConfig,
        prompt: impl Into<String>,
        credential: Option<Credential>,
        options: InvocationOptions,
    ) -> InvocationOutcome {
        let request = self.new_request(config, prompt, credential, options);
        self.run(request).await
    }

    /// Run one invocation to its terminal outcome. Never panics and never
    /// returns an error: failures become failed results, cancellation a
    /// cancelled outcome.
    pub async fn run(&self, request: InvocationRequest) -> InvocationOutcome {
        let request_id = request.request_id.clone();
        let token = CancellationToken::new();
        self.lifecycle.track(&request_id, token.clone());
        self.lifecycle
            .notify_started(&request_id, &request.config, &request.prompt);

        let outcome = self.run_inner(&request, &token).await;
        self.finish(&request_id, &outcome);
        outcome
    }

    async fn run_inner(
        &self,
        request: &InvocationRequest,
        token: &CancellationToken,
    ) -> InvocationOutcome {
        let key = CacheKey::for_invocation(&request.config, &request.prompt);

        if let Some(hit) = self.cache.lookup(&key) {
            debug!(request_id = request.request_id.as_str(), "cache hit");
            return InvocationOutcome::Completed(hit);
        }

        match self.dedup.join_or_own(&key) {
            Joined::Waiter(rx) => {
                // Suspend on the owner's outcome; cancelling here detaches
                // only this waiter.
                tokio::select! {
                    _ = token.cancelled() => InvocationOutcome::Cancelled,
                    joined = rx => match joined {
                        Ok(outcome) => outcome,
                        Err(_) => InvocationOutcome::Completed(InvocationResult::failure(
                            crate::error::ErrorKind::Unknown,
                            "in-flight owner vanished without an outcome",
                        )),
                    },
                }
            }
            Joined::Owner(owner) => {
                let outcome = self.execute_owned(request, token).await;
                if let InvocationOutcome::Completed(result) = &outcome {
                    if result.success {
                        let ttl = self.cache.choose_ttl(&request.prompt);
                        self.cache.store(&key, result, ttl);
                    }
                }
                owner.release(&outcome);
                outcome
            }
        }
    }

    /// The owner path: rate gate, then the retried backend call.
    async fn execute_owned(
        &self,
        request: &InvocationRequest,
        token: &CancellationToken,
    ) -> InvocationOutcome {
        if self.rate_limit_mode != RateLimitMode::Disabled {
            let bucket = bucket_key(&request.config, request.credential.as_ref());
            match self.gate(&bucket, token).await {
                Ok(()) => self.limiter.record_request(&bucket),
                Err(Error::Cancelled) => return InvocationOutcome::Cancelled,
                Err(e) => {
                    info!(
                        request_id = request.request_id.as_str(),
                        backend = request.config.id.as_str(),
                        "refused by client-side rate limiter"
                    );
                    return InvocationOutcome::Completed(InvocationResult::failure(
                        e.kind(),
                        e.to_string(),
                    ));
                }
            }
        }

        let mut policy = self.retry.clone();
        if let Some(attempts) = request.options.max_attempts_override {
            policy = policy.with_max_attempts(attempts);
        }

        let backend = &self.backend;
        let lifecycle = &self.lifecycle;
        let started = std::time::Instant::now();
        let attempt_outcome = run_with_retry(&policy, token, |attempt| {
            if attempt > 1 {
                lifecycle.notify_progress(&request.request_id, attempt);
            }
            let backend = Arc::clone(backend);
            async move { backend.invoke(request, token).await }
        })
        .await;

        match attempt_outcome {
            Ok(mut result) => {
                if result.elapsed_ms == 0 {
                    result = result.with_elapsed(started.elapsed());
                }
                InvocationOutcome::Completed(result)
            }
            Err(Error::Cancelled) => InvocationOutcome::Cancelled,
            Err(e) => InvocationOutcome::Completed(
                InvocationResult::failure(e.kind(), e.to_string()).with_elapsed(started.elapsed()),
            ),
        }
    }

    async fn gate(&self, bucket: &str, token: &CancellationToken) -> Result<()> {
        if self.limiter.try_acquire(bucket) {
            return Ok(());
        }
        match self.rate_limit_mode {
            RateLimitMode::Disabled => Ok(()),
            RateLimitMode::Reject => Err(Error::RateLimit(format!(
                "client-side rate limit exceeded; next request allowed in {} ms",
                self.limiter.next_allowed_in_ms(bucket)
            ))),
            RateLimitMode::Wait => loop {
                let wait = self.limiter.next_allowed_in_ms(bucket).max(10);
                debug!(bucket, wait_ms = wait, "backing off on client-side rate limit");
                tokio::select! {
                    _ = token.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(Duration::from_millis(wait)) => {}
                }
                if self.limiter.try_acquire(bucket) {
                    return Ok(());
                }
            },
        }
    }

    /// Terminal notification; exactly one terminal event per request.
    fn finish(&self, request_id: &str, outcome: &InvocationOutcome) {
        match outcome {
            InvocationOutcome::Completed(result) => {
                self.lifecycle.untrack(request_id);
                if result.success {
                    self.lifecycle.notify_completed(request_id, result);
                } else {
                    self.lifecycle
                        .notify_failed(request_id, result.error_message.as_deref().unwrap_or("unknown failure"));
                }
            }
            InvocationOutcome::Cancelled => {
                // A cancel() through the tracker already untracked and
                // notified; only an owner-propagated cancellation is left
                // to report here.
                if self.lifecycle.is_active(request_id) {
                    self.lifecycle.untrack(request_id);
                    self.lifecycle.notify_cancelled(request_id);
                }
            }
        }
    }

    /// Cancel an active request by id.
    pub fn cancel(&self, request_id: &str) -> bool {
        self.lifecycle.cancel(request_id)
    }

    /// Minimal connectivity probe against a configuration; bypasses cache
    /// and dedup entirely.
    pub async fn test_connection(
        &self,
        config: &BackendConfig,
        credential: Option<&Credential>,
    ) -> Result<()> {
        self.backend.test_connection(config, credential).await
    }

    pub fn add_listener(&self, listener: Arc<dyn InvocationListener>) {
        self.lifecycle.add_listener(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn InvocationListener>) {
        self.lifecycle.remove_listener(listener);
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn lifecycle(&self) -> &LifecycleTracker {
        &self.lifecycle
    }

    /// Spawn the periodic expired-entry sweep. The task runs until aborted.
    pub fn spawn_cache_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.evict_expired();
            }
        })
    }
}
