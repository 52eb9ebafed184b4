//! Bounded TTL store for completed invocation results.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::key::CacheKey;
use super::ttl::TtlPolicy;
use crate::types::InvocationResult;

/// Fraction of entries evicted when the store is full, as a divisor.
const EVICTION_DIVISOR: usize = 10;

/// Global cache switch.
///
/// `Disabled` and `Unavailable` behave identically (always-miss / no-op) but
/// are logged distinguishably: an operator turning the cache off is not the
/// same event as the enable flag being unreadable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheToggle {
    Enabled,
    /// Explicitly switched off by configuration.
    Disabled,
    /// Enable flag could not be read; failing safe to disabled.
    Unavailable,
}

impl CacheToggle {
    pub fn is_enabled(&self) -> bool {
        matches!(self, CacheToggle::Enabled)
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub toggle: CacheToggle,
    pub ttl: TtlPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 256,
            toggle: CacheToggle::Enabled,
            ttl: TtlPolicy::default(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_toggle(mut self, toggle: CacheToggle) -> Self {
        self.toggle = toggle;
        self
    }

    pub fn with_ttl_policy(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Entry {
    result: InvocationResult,
    created_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.ttl
    }
}

/// Capacity-bounded response cache with per-entry TTL.
///
/// Expired entries are removed lazily on read; `evict_expired` exists for a
/// periodic sweep. At capacity, the oldest tenth of entries by creation time
/// (at least one) is evicted before insert. Failed results are never stored.
pub struct CacheStore {
    max_entries: usize,
    ttl_policy: TtlPolicy,
    toggle: Mutex<CacheToggle>,
    entries: Mutex<HashMap<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        match config.toggle {
            CacheToggle::Enabled => {}
            CacheToggle::Disabled => debug!("response cache disabled by configuration"),
            CacheToggle::Unavailable => {
                warn!("cache enable flag unreadable; failing safe to disabled")
            }
        }
        Self {
            max_entries: config.max_entries.max(1),
            ttl_policy: config.ttl,
            toggle: Mutex::new(config.toggle),
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Flip the global switch at runtime; transitions are logged once.
    pub fn set_toggle(&self, toggle: CacheToggle) {
        let mut current = self.toggle.lock().unwrap();
        if *current == toggle {
            return;
        }
        match toggle {
            CacheToggle::Enabled => debug!("response cache enabled"),
            CacheToggle::Disabled => debug!("response cache disabled by configuration"),
            CacheToggle::Unavailable => {
                warn!("cache enable flag unreadable; failing safe to disabled")
            }
        }
        *current = toggle;
    }

    fn enabled(&self) -> bool {
        self.toggle.lock().unwrap().is_enabled()
    }

    /// Cached result if present and unexpired. An expired entry is removed
    /// as a side effect and reported as a miss.
    pub fn lookup(&self, key: &CacheKey) -> Option<InvocationResult> {
        if !self.enabled() {
            return None;
        }
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let hit = match entries.get(key.as_str()) {
            Some(entry) if !entry.is_expired(now) => Some(entry.result.clone()),
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        match hit {
            Some(result) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(result)
            }
            None => {
                entries.remove(key.as_str());
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a successful result. No-op when the cache is off or the result
    /// is not a success.
    pub fn store(&self, key: &CacheKey, result: &InvocationResult, ttl: Duration) {
        if !self.enabled() || !result.success {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.max_entries && !entries.contains_key(key.as_str()) {
            self.evict_oldest(&mut entries);
        }
        entries.insert(
            key.as_str().to_string(),
            Entry {
                result: result.clone(),
                created_at: Instant::now(),
                ttl,
            },
        );
    }

    /// TTL for a prompt, per the keyword-family heuristic.
    pub fn choose_ttl(&self, prompt: &str) -> Duration {
        self.ttl_policy.choose_ttl(prompt)
    }

    /// Remove the oldest tenth of entries by creation time, at least one.
    fn evict_oldest(&self, entries: &mut HashMap<String, Entry>) {
        let count = (entries.len() / EVICTION_DIVISOR).max(1);
        let mut by_age: Vec<(String, Instant)> = entries
            .iter()
            .map(|(k, e)| (k.clone(), e.created_at))
            .collect();
        by_age.sort_by_key(|(_, created)| *created);
        for (key, _) in by_age.into_iter().take(count) {
            entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Periodic sweep; independent of reads.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, remaining = entries.len(), "cache sweep evicted expired entries");
        }
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.lock().unwrap().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn key(n: u32) -> CacheKey {
        CacheKey::new(format!("key-{}", n))
    }

    fn store_with_capacity(max: usize) -> CacheStore {
        CacheStore::new(CacheConfig::new().with_max_entries(max))
    }

    #[test]
    fn test_lookup_hit_and_miss() {
        let store = store_with_capacity(10);
        let result = InvocationResult::ok("cached");
        store.store(&key(1), &result, Duration::from_secs(60));

        assert_eq!(store.lookup(&key(1)), Some(result));
        assert_eq!(store.lookup(&key(2)), None);

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn test_ttl_expiry_removes_entry() {
        let store = store_with_capacity(10);
        store.store(&key(1), &InvocationResult::ok("short-lived"), Duration::from_millis(100));

        sleep(Duration::from_millis(50));
        assert!(store.lookup(&key(1)).is_some());

        sleep(Duration::from_millis(100));
        assert!(store.lookup(&key(1)).is_none());
        assert_eq!(store.stats().size, 0);
    }

    #[test]
    fn test_failed_results_never_stored() {
        let store = store_with_capacity(10);
        let failure = InvocationResult::failure(crate::error::ErrorKind::Api, "HTTP 500");
        store.store(&key(1), &failure, Duration::from_secs(60));
        assert!(store.lookup(&key(1)).is_none());
        assert_eq!(store.stats().size, 0);
    }

    #[test]
    fn test_eviction_drops_oldest_fraction() {
        let store = store_with_capacity(10);
        for n in 0..12 {
            store.store(&key(n), &InvocationResult::ok(format!("v{}", n)), Duration::from_secs(60));
            // Distinct creation times so age ordering is unambiguous.
            sleep(Duration::from_millis(2));
        }

        // Inserting 11th and 12th entries each evicted the oldest entry.
        assert!(store.lookup(&key(0)).is_none());
        assert!(store.lookup(&key(1)).is_none());
        assert!(store.lookup(&key(11)).is_some());
        assert!(store.stats().size <= 10);
        assert!(store.stats().evictions >= 2);
    }

    #[test]
    fn test_disabled_cache_short_circuits() {
        let store = CacheStore::new(
            CacheConfig::new().with_toggle(CacheToggle::Disabled),
        );
        store.store(&key(1), &InvocationResult::ok("x"), Duration::from_secs(60));
        assert!(store.lookup(&key(1)).is_none());
        // Disabled lookups are not counted as misses.
        assert_eq!(store.stats().misses, 0);
    }

    #[test]
    fn test_unavailable_behaves_like_disabled() {
        let store = CacheStore::new(
            CacheConfig::new().with_toggle(CacheToggle::Unavailable),
        );
        store.store(&key(1), &InvocationResult::ok("x"), Duration::from_secs(60));
        assert!(store.lookup(&key(1)).is_none());
    }

    #[test]
    fn test_sweep_and_clear() {
        let store = store_with_capacity(10);
        store.store(&key(1), &InvocationResult::ok("a"), Duration::from_millis(20));
        store.store(&key(2), &InvocationResult::ok("b"), Duration::from_secs(60));

        sleep(Duration::from_millis(40));
        store.evict_expired();
        assert_eq!(store.stats().size, 1);

        store.clear();
        assert_eq!(store.stats().size, 0);
    }
}
