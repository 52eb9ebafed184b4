//! Request lifecycle tracking and listener fan-out.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::types::{BackendConfig, InvocationResult};

/// Observer of invocation lifecycle events. All methods default to no-ops
/// so implementors subscribe to what they need.
pub trait InvocationListener: Send + Sync {
    fn on_started(&self, _request_id: &str, _config: &BackendConfig, _prompt: &str) {}
    /// Fired when a retry attempt beyond the first begins.
    fn on_progress(&self, _request_id: &str, _attempt: u32) {}
    fn on_completed(&self, _request_id: &str, _result: &InvocationResult) {}
    fn on_failed(&self, _request_id: &str, _error: &str) {}
    fn on_cancelled(&self, _request_id: &str) {}
}

/// Assigns request identities, tracks active cancellable work, and
/// broadcasts lifecycle events.
///
/// Listener dispatch is best-effort: each call is isolated, a panicking
/// listener is logged and the remaining listeners still run.
pub struct LifecycleTracker {
    counter: AtomicU64,
    active: Mutex<HashMap<String, CancellationToken>>,
    listeners: Mutex<Vec<Arc<dyn InvocationListener>>>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            active: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Process-unique id: the counter alone guarantees uniqueness, the
    /// timestamp makes ids sortable in logs.
    pub fn next_request_id(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("req-{}-{}", millis, seq)
    }

    pub fn track(&self, request_id: &str, token: CancellationToken) {
        self.active.lock().unwrap().insert(request_id.to_string(), token);
    }

    pub fn untrack(&self, request_id: &str) {
        self.active.lock().unwrap().remove(request_id);
    }

    pub fn is_active(&self, request_id: &str) -> bool {
        self.active.lock().unwrap().contains_key(request_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    /// Cancel one active request. Fires `on_cancelled` and removes it from
    /// the active set; returns false when the id is not active.
    pub fn cancel(&self, request_id: &str) -> bool {
        let token = self.active.lock().unwrap().remove(request_id);
        match token {
            Some(token) => {
                token.cancel();
                self.notify_cancelled(request_id);
                true
            }
            None => false,
        }
    }

    /// Cancel everything currently active (plugin shutdown path).
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(String, CancellationToken)> =
            self.active.lock().unwrap().drain().collect();
        for (request_id, token) in &drained {
            token.cancel();
            self.notify_cancelled(request_id);
        }
        drained.len()
    }

    pub fn add_listener(&self, listener: Arc<dyn InvocationListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn InvocationListener>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn snapshot(&self) -> Vec<Arc<dyn InvocationListener>> {
        self.listeners.lock().unwrap().clone()
    }

    fn broadcast(&self, event: &str, call: impl Fn(&dyn InvocationListener)) {
        for listener in self.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| call(listener.as_ref()))).is_err() {
                warn!(event, "invocation listener panicked; continuing delivery");
            }
        }
    }

    pub fn notify_started(&self, request_id: &str, config: &BackendConfig, prompt: &str) {
        self.broadcast("started", |l| l.on_started(request_id, config, prompt));
    }

    pub fn notify_progress(&self, request_id: &str, attempt: u32) {
        self.broadcast("progress", |l| l.on_progress(request_id, attempt));
    }

    pub fn notify_completed(&self, request_id: &str, result: &InvocationResult) {
        self.broadcast("completed", |l| l.on_completed(request_id, result));
    }

    pub fn notify_failed(&self, request_id: &str, error: &str) {
        self.broadcast("failed", |l| l.on_failed(request_id, error));
    }

    pub fn notify_cancelled(&self, request_id: &str) {
        self.broadcast("cancelled", |l| l.on_cancelled(request_id));
    }
}

impl Default for LifecycleTracker {
    fn default() -> Self {
        Self::new()
    }
}
