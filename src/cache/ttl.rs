//! TTL selection heuristic.
//!
//! Classifies a prompt into a keyword family and returns a class-specific
//! TTL. Best effort only: a pure, deterministic function of the text with a
//! fixed precedence order, never a correctness requirement.

use once_cell::sync::Lazy;
use std::time::Duration;

/// Keyword families, checked in declaration order.
static FAMILIES: Lazy<Vec<(PromptClass, Vec<&'static str>)>> = Lazy::new(|| {
    vec![
        (
            PromptClass::Transformation,
            vec![
                "refactor", "rewrite", "convert", "translate", "optimize", "optimise", "fix",
                "rename", "simplify", "migrate",
            ],
        ),
        (
            PromptClass::Explanation,
            vec![
                "explain", "analyze", "analyse", "describe", "summarize", "summarise", "review",
                "document", "walk through",
            ],
        ),
        (
            PromptClass::Lookup,
            vec![
                "what is", "what does", "define", "definition", "syntax of", "meaning of",
                "how do i", "usage of",
            ],
        ),
    ]
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptClass {
    Transformation,
    Explanation,
    Lookup,
    Default,
}

/// Per-class TTLs.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    /// Transform/refactor prompts; the surrounding code changes quickly.
    pub transformation: Duration,
    /// Explanation/analysis prompts.
    pub explanation: Duration,
    /// Simple-lookup prompts; answers are stable.
    pub lookup: Duration,
    pub default: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            transformation: Duration::from_secs(15 * 60),
            explanation: Duration::from_secs(60 * 60),
            lookup: Duration::from_secs(6 * 60 * 60),
            default: Duration::from_secs(30 * 60),
        }
    }
}

impl TtlPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(prompt: &str) -> PromptClass {
        let p = prompt.to_lowercase();
        for (class, keywords) in FAMILIES.iter() {
            if keywords.iter().any(|k| p.contains(k)) {
                return *class;
            }
        }
        PromptClass::Default
    }

    /// TTL for a prompt. Pure and deterministic; identical prompts always
    /// classify identically.
    pub fn choose_ttl(&self, prompt: &str) -> Duration {
        match Self::classify(prompt) {
            PromptClass::Transformation => self.transformation,
            PromptClass::Explanation => self.explanation,
            PromptClass::Lookup => self.lookup,
            PromptClass::Default => self.default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_families() {
        assert_eq!(TtlPolicy::classify("Refactor this function"), PromptClass::Transformation);
        assert_eq!(TtlPolicy::classify("please EXPLAIN the borrow checker"), PromptClass::Explanation);
        assert_eq!(TtlPolicy::classify("what is a trait object"), PromptClass::Lookup);
        assert_eq!(TtlPolicy::classify("hello there"), PromptClass::Default);
    }

    #[test]
    fn test_precedence_is_deterministic() {
        // Matches both transformation and explanation vocabulary; the first
        // family in declaration order wins, every time.
        let p = "refactor and explain this";
        assert_eq!(TtlPolicy::classify(p), PromptClass::Transformation);
        assert_eq!(TtlPolicy::classify(p), PromptClass::Transformation);
    }

    #[test]
    fn test_ttl_mapping() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.choose_ttl("convert to async"), policy.transformation);
        assert_eq!(policy.choose_ttl("describe the lifecycle"), policy.explanation);
        assert_eq!(policy.choose_ttl("definition of variance"), policy.lookup);
        assert_eq!(policy.choose_ttl("gibberish"), policy.default);
    }
}
