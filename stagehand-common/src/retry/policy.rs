//! Retry policy: classifier, retry budget and fixed delay.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::classifier::{Classification, ErrorClassifier, PatternClassifier, RetryPattern};
use crate::error::HarnessResult;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Serializable retry settings, persisted with the invocation config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Ordered retryable signatures.
    pub patterns: Vec<RetryPattern>,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Fixed delay between attempts in milliseconds.
    pub delay_ms: u64,
}

impl RetrySettings {
    /// Transient signatures seen against Azure Resource Manager.
    pub fn azure_defaults() -> Self {
        Self {
            patterns: vec![
                RetryPattern::new(".*timeout.*", "Timeout error - retrying"),
                RetryPattern::new(
                    ".*ResourceGroupNotFound.*",
                    "Resource group not found - retrying",
                ),
                RetryPattern::new(".*AlreadyExists.*", "Resource already exists - retrying"),
                RetryPattern::new(".*TooManyRequests.*", "Too many requests - retrying"),
                RetryPattern::new(".*StatusCode=429.*", "Rate limited - retrying"),
                RetryPattern::new(".*RetryableError.*", "Provider reported retryable error"),
                RetryPattern::new(
                    ".*Error acquiring the state lock.*",
                    "State lock held - retrying",
                ),
            ],
            max_retries: DEFAULT_MAX_RETRIES,
            delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
        }
    }

    /// Settings that never retry.
    pub fn no_retry() -> Self {
        Self {
            patterns: Vec::new(),
            max_retries: 0,
            delay_ms: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    /// Append patterns after the existing ones; earlier patterns keep priority.
    #[must_use]
    pub fn with_patterns(mut self, extra: impl IntoIterator<Item = RetryPattern>) -> Self {
        for pattern in extra {
            if !self.patterns.contains(&pattern) {
                self.patterns.push(pattern);
            }
        }
        self
    }

    /// Compile into an executable policy.
    pub fn compile(&self) -> HarnessResult<RetryPolicy> {
        let classifier = PatternClassifier::new(&self.patterns)?;
        Ok(RetryPolicy::new(classifier, self.max_retries, self.delay()))
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::azure_defaults()
    }
}

/// Executable retry policy.
///
/// `max_retries` counts retries, not attempts: `max_retries = 3` allows the
/// first attempt plus three retries, four invocations in total.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    classifier: Arc<dyn ErrorClassifier>,
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(
        classifier: impl ErrorClassifier + 'static,
        max_retries: u32,
        delay: Duration,
    ) -> Self {
        Self {
            classifier: Arc::new(classifier),
            max_retries,
            delay,
        }
    }

    /// Total invocations allowed, first attempt included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn classify(&self, output: &str) -> Classification {
        self.classifier.classify(output)
    }
}
