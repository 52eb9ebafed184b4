//! Backend dispatch: one wire protocol module per backend kind.
//!
//! Mirrors the differences between the three supported protocols:
//! - chat-style: `choices[].message.content`, bearer auth, finish-reason policy
//! - message-style: `content[].text`, credential + version headers
//! - local: `/api/generate`, newline-delimited JSON fragments, no credential
//!
//! The dispatcher selects a protocol by the [`BackendKind`] tag; there is no
//! runtime type inspection.

pub mod chat;
pub mod local;
pub mod message;

use async_trait::async_trait;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Error;
use crate::transport::HttpClientPool;
use crate::types::{BackendConfig, BackendKind, Credential, InvocationRequest, InvocationResult};
use crate::Result;

/// A backend capable of executing one invocation. The engine only ever
/// talks to this seam, which is what test stubs implement.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Execute one attempt. Errs only with transport/protocol failures or
    /// [`Error::Cancelled`]; HTTP-level anomalies become typed errors here
    /// and failed results at the retry boundary.
    async fn invoke(
        &self,
        request: &InvocationRequest,
        cancel: &CancellationToken,
    ) -> Result<InvocationResult>;

    /// Minimal connectivity probe. Touches neither cache nor dedup.
    async fn test_connection(
        &self,
        config: &BackendConfig,
        credential: Option<&Credential>,
    ) -> Result<()>;
}

/// Production dispatcher: real HTTP against the configured backend.
pub struct HttpDispatcher {
    pool: HttpClientPool,
}

impl HttpDispatcher {
    pub fn new() -> Self {
        Self {
            pool: HttpClientPool::new(),
        }
    }

    fn check_credential(config: &BackendConfig, credential: Option<&Credential>) -> Result<()> {
        if config.kind.requires_credential() {
            match credential {
                Some(c) if !c.is_empty() => Ok(()),
                _ => Err(Error::Config(format!(
                    "backend '{}' ({}) requires a credential",
                    config.id, config.kind
                ))),
            }
        } else {
            Ok(())
        }
    }
}

impl Default for HttpDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelBackend for HttpDispatcher {
    async fn invoke(
        &self,
        request: &InvocationRequest,
        cancel: &CancellationToken,
    ) -> Result<InvocationResult> {
        request.config.validate()?;
        Self::check_credential(&request.config, request.credential.as_ref())?;

        let start = Instant::now();
        let result = match request.config.kind {
            BackendKind::ChatStyle => chat::invoke(&self.pool, request, cancel).await,
            BackendKind::MessageStyle => message::invoke(&self.pool, request, cancel).await,
            BackendKind::Local => local::invoke(&self.pool, request, cancel).await,
        };
        debug!(
            backend = request.config.id.as_str(),
            kind = request.config.kind.as_str(),
            duration_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "backend attempt finished"
        );
        result.map(|r| r.with_elapsed(start.elapsed()))
    }

    async fn test_connection(
        &self,
        config: &BackendConfig,
        credential: Option<&Credential>,
    ) -> Result<()> {
        config.validate()?;
        Self::check_credential(config, credential)?;

        let cancel = CancellationToken::new();
        match config.kind {
            BackendKind::ChatStyle => chat::test_connection(&self.pool, config, credential, &cancel).await,
            BackendKind::MessageStyle => {
                message::test_connection(&self.pool, config, credential, &cancel).await
            }
            BackendKind::Local => local::test_connection(&self.pool, config, &cancel).await,
        }
    }
}

/// Map a non-2xx response to a diagnosable API error, preferring the
/// provider's structured message over the raw body.
pub(crate) fn status_error(status: u16, body: &str) -> Error {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str().map(String::from))
        })
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.len() > 200 {
                format!("{}...", &trimmed[..200])
            } else {
                trimmed.to_string()
            }
        });
    Error::Api(format!("HTTP {}: {}", status, detail))
}

pub(crate) fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}
