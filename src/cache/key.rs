//! Cache key generation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::types::BackendConfig;

/// Deterministic fingerprint identifying a logically-repeatable request.
///
/// Two invocations with the same (config id, model, prompt, temperature,
/// max_tokens) hash to the same key regardless of call order. The credential
/// is intentionally not part of the fingerprint; see DESIGN.md.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    hash: String,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    pub fn for_invocation(config: &BackendConfig, prompt: &str) -> Self {
        Self::compute(&config.id, &config.model, prompt, config.temperature, config.max_tokens)
    }

    pub fn compute(config_id: &str, model: &str, prompt: &str, temperature: f64, max_tokens: u32) -> Self {
        // BTreeMap gives a stable field order; the serialized map is the
        // canonical form that gets hashed.
        let mut parts: BTreeMap<&str, String> = BTreeMap::new();
        parts.insert("config", config_id.to_string());
        parts.insert("model", model.to_string());
        parts.insert("prompt", prompt.to_string());
        parts.insert("temperature", format!("{:.4}", temperature));
        parts.insert("max_tokens", max_tokens.to_string());

        let canonical = serde_json::to_string(&parts).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hash: String = hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect();
        Self { hash }
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BackendKind;

    fn cfg() -> BackendConfig {
        BackendConfig::new("cfg-1", BackendKind::ChatStyle, "https://api.example.com/v1", "gpt-x")
            .with_temperature(0.2)
            .with_max_tokens(512)
    }

    #[test]
    fn test_same_inputs_same_key() {
        let a = CacheKey::for_invocation(&cfg(), "explain this");
        let b = CacheKey::for_invocation(&cfg(), "explain this");
        assert_eq!(a, b);
    }

    #[test]
    fn test_each_input_changes_key() {
        let base = CacheKey::for_invocation(&cfg(), "explain this");

        let other_prompt = CacheKey::for_invocation(&cfg(), "explain that");
        assert_ne!(base, other_prompt);

        let mut c = cfg();
        c.id = "cfg-2".into();
        assert_ne!(base, CacheKey::for_invocation(&c, "explain this"));

        let mut c = cfg();
        c.model = "gpt-y".into();
        assert_ne!(base, CacheKey::for_invocation(&c, "explain this"));

        let c = cfg().with_temperature(0.3);
        assert_ne!(base, CacheKey::for_invocation(&c, "explain this"));

        let c = cfg().with_max_tokens(513);
        assert_ne!(base, CacheKey::for_invocation(&c, "explain this"));
    }

    #[test]
    fn test_credential_not_part_of_key() {
        // The fingerprint is derived from the config and prompt only; there
        // is no credential input to vary. Guard the field list instead.
        let key = CacheKey::compute("id", "model", "prompt", 0.7, 256);
        assert_eq!(key, CacheKey::compute("id", "model", "prompt", 0.7, 256));
    }
}
