//! Classification of tool failures into retryable and fatal.
//!
//! The matching strategy sits behind [`ErrorClassifier`] so call sites only
//! ever see a [`Classification`].

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// Verdict for one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Known transient signature; carries the human-readable reason.
    Retryable { reason: String },
    /// No signature matched.
    Fatal,
}

impl Classification {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

/// Decides whether a failure's output text is worth retrying.
pub trait ErrorClassifier: Send + Sync + std::fmt::Debug {
    fn classify(&self, output: &str) -> Classification;
}

/// One (pattern, reason) pair in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPattern {
    pub pattern: String,
    pub reason: String,
}

impl RetryPattern {
    pub fn new(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

/// Regex classifier. Patterns are tried in order against the full output;
/// the first match wins.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    rules: Vec<(Regex, String)>,
}

impl PatternClassifier {
    /// Compile the patterns, rejecting the whole set if any is invalid.
    pub fn new(patterns: &[RetryPattern]) -> HarnessResult<Self> {
        let rules = patterns
            .iter()
            .map(|p| {
                Regex::new(&p.pattern)
                    .map(|re| (re, p.reason.clone()))
                    .map_err(|e| {
                        HarnessError::Config(format!(
                            "invalid retry pattern '{}': {e}",
                            p.pattern
                        ))
                    })
            })
            .collect::<HarnessResult<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl ErrorClassifier for PatternClassifier {
    fn classify(&self, output: &str) -> Classification {
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(output))
            .map(|(_, reason)| Classification::Retryable {
                reason: reason.clone(),
            })
            .unwrap_or(Classification::Fatal)
    }
}
