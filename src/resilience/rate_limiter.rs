//! Token-bucket rate limiter with secondary sliding-window caps.
//!
//! One bucket per (backend configuration, credential) pair, created lazily
//! on first use. The bucket refills continuously at `burst_capacity / 60`
//! tokens per second (a full refill in one minute). Configured hourly/daily
//! request caps are enforced on top: while a cap is exceeded, tokens are
//! forced to zero regardless of the bucket math.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::types::{BackendConfig, Credential};

#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    /// Maximum tokens in a bucket; also fixes the refill rate (full refill
    /// in one minute).
    pub burst_capacity: f64,
    pub hourly_cap: Option<u32>,
    pub daily_cap: Option<u32>,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            burst_capacity: 10.0,
            hourly_cap: None,
            daily_cap: None,
        }
    }
}

impl RateLimitPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_burst_capacity(mut self, burst: f64) -> Self {
        self.burst_capacity = burst.max(1.0);
        self
    }

    pub fn with_hourly_cap(mut self, cap: u32) -> Self {
        self.hourly_cap = Some(cap);
        self
    }

    pub fn with_daily_cap(mut self, cap: u32) -> Self {
        self.daily_cap = Some(cap);
        self
    }

    fn refill_rate(&self) -> f64 {
        self.burst_capacity / 60.0
    }

    /// Timestamps older than this can never affect a cap decision.
    fn prune_horizon(&self) -> Duration {
        if self.daily_cap.is_some() {
            Duration::from_secs(24 * 60 * 60)
        } else {
            Duration::from_secs(60 * 60)
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub tokens: f64,
    pub burst_capacity: f64,
    pub recent_requests: usize,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    recent: VecDeque<Instant>,
}

impl Bucket {
    fn new(burst: f64) -> Self {
        Self {
            tokens: burst,
            last_refill: Instant::now(),
            recent: VecDeque::new(),
        }
    }

    fn refill(&mut self, policy: &RateLimitPolicy, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * policy.refill_rate()).min(policy.burst_capacity);
            self.last_refill = now;
        }
    }

    fn prune(&mut self, policy: &RateLimitPolicy, now: Instant) {
        let horizon = policy.prune_horizon();
        while let Some(ts) = self.recent.front() {
            if now.duration_since(*ts) > horizon {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    fn window_exceeded(&mut self, policy: &RateLimitPolicy, now: Instant) -> bool {
        self.prune(policy, now);
        if let Some(cap) = policy.hourly_cap {
            let hour = Duration::from_secs(60 * 60);
            let in_hour = self
                .recent
                .iter()
                .filter(|ts| now.duration_since(**ts) <= hour)
                .count();
            if in_hour >= cap as usize {
                return true;
            }
        }
        if let Some(cap) = policy.daily_cap {
            if self.recent.len() >= cap as usize {
                return true;
            }
        }
        false
    }
}

struct Inner {
    policy: RateLimitPolicy,
    buckets: HashMap<String, Bucket>,
}

/// Per-key token buckets behind one lock. No lock is held across I/O;
/// every operation is pure bookkeeping.
pub struct RateLimiter {
    inner: Mutex<Inner>,
}

/// Key for a (configuration, credential) pair. The credential contributes a
/// short digest, never the secret itself, so keys are safe to log.
pub fn bucket_key(config: &BackendConfig, credential: Option<&Credential>) -> String {
    match credential {
        Some(c) => {
            let mut hasher = Sha256::new();
            hasher.update(c.expose().as_bytes());
            let digest = hasher.finalize();
            format!("{}:{:02x}{:02x}{:02x}{:02x}", config.id, digest[0], digest[1], digest[2], digest[3])
        }
        None => format!("{}:-", config.id),
    }
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner {
                policy,
                buckets: HashMap::new(),
            }),
        }
    }

    /// Consume one token if available. Refuses without blocking.
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let policy = inner.policy.clone();
        let bucket = inner
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(policy.burst_capacity));
        bucket.refill(&policy, now);
        if bucket.window_exceeded(&policy, now) {
            bucket.tokens = 0.0;
            debug!(bucket = key, "rate limiter refused: sliding-window cap exceeded");
            return false;
        }
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            debug!(bucket = key, tokens = bucket.tokens, "rate limiter refused: bucket empty");
            false
        }
    }

    /// Record a performed request for sliding-window accounting.
    pub fn record_request(&self, key: &str) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let policy = inner.policy.clone();
        let bucket = inner
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(policy.burst_capacity));
        bucket.recent.push_back(now);
        bucket.prune(&policy, now);
    }

    /// Milliseconds until a token will be available; 0 when one already is.
    pub fn next_allowed_in_ms(&self, key: &str) -> u64 {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let policy = inner.policy.clone();
        let bucket = inner
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(policy.burst_capacity));
        bucket.refill(&policy, now);

        let mut wait_ms: u64 = 0;
        if bucket.window_exceeded(&policy, now) {
            bucket.tokens = 0.0;
            // Wait for the oldest counted timestamp to age out of the hour.
            if let Some(oldest) = bucket.recent.front() {
                let hour = Duration::from_secs(60 * 60);
                let age = now.duration_since(*oldest);
                if age < hour {
                    wait_ms = (hour - age).as_millis() as u64;
                }
            }
        }
        if bucket.tokens < 1.0 {
            let missing = 1.0 - bucket.tokens;
            let refill_ms = (missing / policy.refill_rate() * 1000.0).ceil() as u64;
            wait_ms = wait_ms.max(refill_ms);
        }
        wait_ms
    }

    /// Whole tokens currently available after refill.
    pub fn remaining_quota(&self, key: &str) -> u32 {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let policy = inner.policy.clone();
        let bucket = inner
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(policy.burst_capacity));
        bucket.refill(&policy, now);
        if bucket.window_exceeded(&policy, now) {
            bucket.tokens = 0.0;
            return 0;
        }
        bucket.tokens.floor() as u32
    }

    pub fn snapshot(&self, key: &str) -> Option<RateLimiterSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner.buckets.get(key).map(|b| RateLimiterSnapshot {
            tokens: b.tokens,
            burst_capacity: inner.policy.burst_capacity,
            recent_requests: b.recent.len(),
        })
    }

    pub fn reset(&self, key: &str) {
        self.inner.lock().unwrap().buckets.remove(key);
    }

    /// Replace the policy. Existing buckets are cleared so the new policy
    /// applies cleanly.
    pub fn configure(&self, policy: RateLimitPolicy) {
        let mut inner = self.inner.lock().unwrap();
        inner.policy = policy;
        inner.buckets.clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitPolicy::default())
    }
}
