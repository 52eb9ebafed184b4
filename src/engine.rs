//! Invocation engine: the orchestrator tying cache, dedup, rate limiting,
//! retry, dispatch and lifecycle together.
//!
//! Developer-friendly goal: keep the public surface small and predictable.
//! Implementation details are split into submodules under `src/engine/`.

pub mod builder;
pub mod core;

pub use self::builder::EngineBuilder;
pub use self::core::{InvocationEngine, RateLimitMode};
