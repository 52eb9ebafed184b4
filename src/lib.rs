//! # ai-invoker
//!
//! 模型调用执行引擎 — 将一次"对该后端配置运行此提示词"的逻辑调用，转化为
//! 安全、高效、有弹性的网络操作。
//!
//! A resilient model-invocation execution engine for pluggable AI backends.
//! It turns a logical "run this prompt against this backend configuration"
//! call into a safe, efficient, resilient network operation.
//!
//! ## Overview
//!
//! One call flows through: lifecycle id → cache probe → deduplication →
//! (advisory) rate gate → bounded retry → protocol dispatch → cache fill →
//! waiter release → listener notification. Concurrent identical calls
//! collapse into a single backend round trip; every caller observes the
//! same immutable result.
//!
//! ## Key Features
//!
//! - **Response caching**: TTL per keyword family, bounded capacity with
//!   oldest-first eviction via the [`cache`] module
//! - **Deduplication**: at most one in-flight call per fingerprint via
//!   [`dedup::DedupCoordinator`]
//! - **Rate limiting**: token bucket plus sliding-window caps via
//!   [`resilience::rate_limiter`]
//! - **Retry**: bounded exponential backoff with error classification via
//!   [`resilience::retry`]
//! - **Multi-protocol dispatch**: chat-style, message-style and local
//!   backends via the [`backend`] module
//! - **Lifecycle tracking**: cancellable requests and isolated listener
//!   fan-out via [`lifecycle::LifecycleTracker`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_invoker::{BackendConfig, BackendKind, InvocationEngine, InvocationOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = InvocationEngine::builder().build();
//!     let config = BackendConfig::new(
//!         "local-llama",
//!         BackendKind::Local,
//!         "http://localhost:11434",
//!         "llama3",
//!     );
//!
//!     let outcome = engine
//!         .invoke(config, "Explain the borrow checker", None, InvocationOptions::new())
//!         .await;
//!     if let Some(result) = outcome.result() {
//!         println!("{}", result.content.as_deref().unwrap_or(""));
//!     }
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`engine`] | Orchestration: the invocation engine and its builder |
//! | [`backend`] | Wire protocols and the dispatch seam |
//! | [`cache`] | Fingerprints, TTL heuristic, bounded store |
//! | [`dedup`] | In-flight request deduplication |
//! | [`resilience`] | Rate limiting and retry |
//! | [`lifecycle`] | Request ids, cancellation, listeners |
//! | [`transport`] | Pooled HTTP clients |
//! | [`types`] | Core value types |

pub mod backend;
pub mod cache;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod resilience;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use backend::{HttpDispatcher, ModelBackend};
pub use engine::{EngineBuilder, InvocationEngine, RateLimitMode};
pub use error::{Error, ErrorKind};
pub use lifecycle::InvocationListener;
pub use resilience::rate_limiter::RateLimitPolicy;
pub use resilience::retry::RetryPolicy;
pub use types::{
    BackendConfig, BackendKind, Credential, InvocationOptions, InvocationOutcome,
    InvocationRequest, InvocationResult,
};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
