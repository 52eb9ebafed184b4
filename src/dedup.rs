//! Deduplication coordinator: collapse concurrent identical requests into
//! one backend round trip.
//!
//! Per cache key the state machine is `Absent → Owned → Absent`. The first
//! caller becomes the owner and performs the real call; everyone arriving
//! while the group exists gets a waiter handle resolved by the owner's
//! single outcome. The whole group is torn down at once on release —
//! waiters are never removed individually. A caller arriving after release
//! becomes a fresh owner: suppression is best-effort within the overlap
//! window, not exactly-once forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::cache::CacheKey;
use crate::types::InvocationOutcome;

type GroupMap = HashMap<String, PendingGroup>;

struct PendingGroup {
    waiters: Vec<oneshot::Sender<InvocationOutcome>>,
}

/// Result of [`DedupCoordinator::join_or_own`].
pub enum Joined {
    /// Caller is the owner and must invoke the backend, then `release`.
    Owner(OwnerToken),
    /// Caller suspends on the receiver; the owner resolves it. A dropped
    /// receiver detaches this waiter without touching the owner's call.
    Waiter(oneshot::Receiver<InvocationOutcome>),
}

pub struct DedupCoordinator {
    groups: Arc<Mutex<GroupMap>>,
}

impl DedupCoordinator {
    pub fn new() -> Self {
        Self {
            groups: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Atomic check-and-set against the group map: exactly one of any set
    /// of racing callers becomes the owner for a key.
    pub fn join_or_own(&self, key: &CacheKey) -> Joined {
        let mut groups = self.groups.lock().unwrap();
        match groups.get_mut(key.as_str()) {
            Some(group) => {
                let (tx, rx) = oneshot::channel();
                group.waiters.push(tx);
                debug!(key = key.as_str(), waiters = group.waiters.len(), "joined in-flight group");
                Joined::Waiter(rx)
            }
            None => {
                groups.insert(key.as_str().to_string(), PendingGroup { waiters: Vec::new() });
                Joined::Owner(OwnerToken {
                    key: key.as_str().to_string(),
                    groups: Arc::clone(&self.groups),
                    released: false,
                })
            }
        }
    }

    /// Number of keys with an in-flight owner.
    pub fn pending_count(&self) -> usize {
        self.groups.lock().unwrap().len()
    }
}

impl Default for DedupCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of ownership for one in-flight key. Must be released with the
/// terminal outcome; dropping without releasing resolves the group as
/// cancelled so waiters are never left hanging.
pub struct OwnerToken {
    key: String,
    groups: Arc<Mutex<GroupMap>>,
    released: bool,
}

impl OwnerToken {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Deliver the outcome to every waiter and remove the group.
    pub fn release(mut self, outcome: &InvocationOutcome) {
        self.release_inner(outcome.clone());
    }

    fn release_inner(&mut self, outcome: InvocationOutcome) {
        if self.released {
            return;
        }
        self.released = true;
        let group = self.groups.lock().unwrap().remove(&self.key);
        if let Some(group) = group {
            let waiters = group.waiters.len();
            for tx in group.waiters {
                // A send failure means that waiter detached (cancelled).
                let _ = tx.send(outcome.clone());
            }
            debug!(key = self.key.as_str(), waiters, "released in-flight group");
        }
    }
}

impl Drop for OwnerToken {
    fn drop(&mut self) {
        if !self.released {
            warn!(key = self.key.as_str(), "owner dropped without release; resolving group as cancelled");
            self.release_inner(InvocationOutcome::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InvocationResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(s: &str) -> CacheKey {
        CacheKey::new(s)
    }

    #[tokio::test]
    async fn test_first_caller_owns_rest_wait() {
        let dedup = DedupCoordinator::new();
        let owner = match dedup.join_or_own(&key("k")) {
            Joined::Owner(o) => o,
            Joined::Waiter(_) => panic!("first caller must own"),
        };
        let rx = match dedup.join_or_own(&key("k")) {
            Joined::Waiter(rx) => rx,
            Joined::Owner(_) => panic!("second caller must wait"),
        };
        assert_eq!(dedup.pending_count(), 1);

        let outcome = InvocationOutcome::Completed(InvocationResult::ok("shared"));
        owner.release(&outcome);

        assert_eq!(rx.await.unwrap(), outcome);
        assert_eq!(dedup.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_release_tears_down_whole_group() {
        let dedup = DedupCoordinator::new();
        let owner = match dedup.join_or_own(&key("k")) {
            Joined::Owner(o) => o,
            _ => unreachable!(),
        };
        let receivers: Vec<_> = (0..5)
            .map(|_| match dedup.join_or_own(&key("k")) {
                Joined::Waiter(rx) => rx,
                _ => panic!("must wait"),
            })
            .collect();

        owner.release(&InvocationOutcome::Cancelled);
        for rx in receivers {
            assert_eq!(rx.await.unwrap(), InvocationOutcome::Cancelled);
        }

        // Key is Absent again; next caller becomes a fresh owner.
        assert!(matches!(dedup.join_or_own(&key("k")), Joined::Owner(_)));
    }

    #[tokio::test]
    async fn test_distinct_keys_are_independent() {
        let dedup = DedupCoordinator::new();
        assert!(matches!(dedup.join_or_own(&key("a")), Joined::Owner(_)));
        assert!(matches!(dedup.join_or_own(&key("b")), Joined::Owner(_)));
        assert_eq!(dedup.pending_count(), 2);
    }

    #[tokio::test]
    async fn test_dropped_owner_resolves_waiters_cancelled() {
        let dedup = DedupCoordinator::new();
        let owner = match dedup.join_or_own(&key("k")) {
            Joined::Owner(o) => o,
            _ => unreachable!(),
        };
        let rx = match dedup.join_or_own(&key("k")) {
            Joined::Waiter(rx) => rx,
            _ => unreachable!(),
        };

        drop(owner);
        assert_eq!(rx.await.unwrap(), InvocationOutcome::Cancelled);
        assert_eq!(dedup.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_detached_waiter_does_not_disturb_release() {
        let dedup = DedupCoordinator::new();
        let owner = match dedup.join_or_own(&key("k")) {
            Joined::Owner(o) => o,
            _ => unreachable!(),
        };
        let rx1 = match dedup.join_or_own(&key("k")) {
            Joined::Waiter(rx) => rx,
            _ => unreachable!(),
        };
        let rx2 = match dedup.join_or_own(&key("k")) {
            Joined::Waiter(rx) => rx,
            _ => unreachable!(),
        };

        drop(rx1);
        let outcome = InvocationOutcome::Completed(InvocationResult::ok("still delivered"));
        owner.release(&outcome);
        assert_eq!(rx2.await.unwrap(), outcome);
    }

    #[tokio::test]
    async fn test_racing_callers_produce_exactly_one_owner() {
        let dedup = Arc::new(DedupCoordinator::new());
        let owners = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(tokio::sync::Barrier::new(10));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let dedup = dedup.clone();
            let owners = owners.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                match dedup.join_or_own(&CacheKey::new("race")) {
                    Joined::Owner(owner) => {
                        owners.fetch_add(1, Ordering::SeqCst);
                        // Keep the group alive long enough for every racer
                        // to join it before release.
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        owner.release(&InvocationOutcome::Completed(InvocationResult::ok("x")));
                    }
                    Joined::Waiter(rx) => {
                        let _ = rx.await;
                    }
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(owners.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.pending_count(), 0);
    }
}
