//! Benchmark error classification.
//!
//! A single error type for sweep failures, exposing whether a failed cycle
//! is worth re-running.

use std::time::Duration;

use stagehand_common::HarnessError;

/// Errors that can occur while running a sweep.
#[derive(Debug, thiserror::Error)]
pub enum BenchmarkError {
    #[error("Benchmark skipped: {0}")]
    Skipped(String),

    #[error("Invalid sweep: {0}")]
    InvalidSweep(String),

    #[error("Config for {parameter}={value} could not be built: {source}")]
    Setup {
        parameter: String,
        value: u64,
        #[source]
        source: HarnessError,
    },

    #[error("Deploy failed at {parameter}={value} (iteration {iteration}): {source}")]
    Deploy {
        parameter: String,
        value: u64,
        iteration: u32,
        #[source]
        source: HarnessError,
    },

    /// Resources from a successful deploy may still exist.
    #[error("Destroy failed at {parameter}={value} (iteration {iteration}): {source}")]
    Destroy {
        parameter: String,
        value: u64,
        iteration: u32,
        #[source]
        source: HarnessError,
    },

    #[error("Mean {metric} {mean:?} exceeds budget {budget:?}")]
    BudgetExceeded {
        metric: String,
        mean: Duration,
        budget: Duration,
    },

    #[error("Benchmark worker failed: {0}")]
    Worker(String),

    /// A harness failure outside any single cycle.
    #[error(transparent)]
    Harness(#[from] HarnessError),
}

impl BenchmarkError {
    fn harness_source(&self) -> Option<&HarnessError> {
        match self {
            Self::Setup { source, .. }
            | Self::Deploy { source, .. }
            | Self::Destroy { source, .. }
            | Self::Harness(source) => Some(source),
            _ => None,
        }
    }

    /// Whether re-running the cycle could succeed: the tool kept hitting a
    /// transient signature, or a consistency wait ran out.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.harness_source(),
            Some(HarnessError::RetriesExhausted { .. } | HarnessError::Timeout { .. })
        )
    }

    /// Whether this is a skip rather than a failure.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skipped(_)) || self.harness_source().is_some_and(HarnessError::is_skip)
    }

    /// Whether cloud resources may have been left behind.
    pub fn may_leak_resources(&self) -> bool {
        matches!(self, Self::Deploy { .. } | Self::Destroy { .. })
    }
}
