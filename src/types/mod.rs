//! Core type definitions: backend configuration and invocation values.

pub mod config;
pub mod invocation;

pub use config::{BackendConfig, BackendKind, Credential};
pub use invocation::{InvocationOptions, InvocationOutcome, InvocationRequest, InvocationResult};
