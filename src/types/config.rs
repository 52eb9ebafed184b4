use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Error, Result};

/// Wire protocol spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// OpenAI-compatible chat completions (`choices[].message.content`).
    ChatStyle,
    /// Anthropic-compatible messages (`content[].text`, versioned header auth).
    MessageStyle,
    /// Ollama-compatible local server (`/api/generate`, newline-delimited JSON).
    Local,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::ChatStyle => "chat_style",
            BackendKind::MessageStyle => "message_style",
            BackendKind::Local => "local",
        }
    }

    /// Local servers run without credentials; the hosted kinds require one.
    pub fn requires_credential(&self) -> bool {
        !matches!(self, BackendKind::Local)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opaque API secret associated with a backend configuration.
///
/// Debug/Display never print the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential(***)")
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Credential {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// One configured backend. Owned by the configuration collaborator upstream;
/// treated as immutable input per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    pub kind: BackendKind,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub enabled: bool,
}

impl BackendConfig {
    pub fn new(id: impl Into<String>, kind: BackendKind, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            base_url: base_url.into(),
            model: model.into(),
            temperature: 0.7,
            max_tokens: 1024,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            enabled: true,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Base URL with any trailing slash removed, so paths can be appended.
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Pre-flight sanity check before any network work.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Err(Error::Config(format!("backend '{}' is disabled", self.id)));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("backend '{}' has invalid base URL: {}", self.id, e)))?;
        if self.model.is_empty() {
            return Err(Error::Config(format!("backend '{}' has no model name", self.id)));
        }
        Ok(())
    }
}
