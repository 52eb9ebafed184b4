use std::sync::Arc;

use super::core::{InvocationEngine, RateLimitMode};
use crate::backend::{HttpDispatcher, ModelBackend};
use crate::cache::{CacheConfig, CacheStore};
use crate::dedup::DedupCoordinator;
use crate::lifecycle::LifecycleTracker;
use crate::resilience::rate_limiter::{RateLimitPolicy, RateLimiter};
use crate::resilience::retry::RetryPolicy;

/// Builder wiring the engine's collaborators. Every collaborator has a
/// sensible default; tests swap the backend for a stub through
/// [`with_backend`](EngineBuilder::with_backend).
pub struct EngineBuilder {
    cache_config: CacheConfig,
    retry: RetryPolicy,
    rate_policy: RateLimitPolicy,
    rate_limit_mode: RateLimitMode,
    backend: Option<Arc<dyn ModelBackend>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            cache_config: CacheConfig::default(),
            retry: RetryPolicy::default(),
            rate_policy: RateLimitPolicy::default(),
            rate_limit_mode: RateLimitMode::default(),
            backend: None,
        }
    }

    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_rate_limit_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_policy = policy;
        self
    }

    pub fn with_rate_limit_mode(mut self, mode: RateLimitMode) -> Self {
        self.rate_limit_mode = mode;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn build(self) -> InvocationEngine {
        InvocationEngine {
            cache: Arc::new(CacheStore::new(self.cache_config)),
            dedup: Arc::new(DedupCoordinator::new()),
            limiter: Arc::new(RateLimiter::new(self.rate_policy)),
            rate_limit_mode: self.rate_limit_mode,
            retry: self.retry,
            lifecycle: Arc::new(LifecycleTracker::new()),
            backend: self
                .backend
                .unwrap_or_else(|| Arc::new(HttpDispatcher::new())),
        }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
