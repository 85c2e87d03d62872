//! Error taxonomy for harness operations.
//!
//! Every variant propagates to the owning test or benchmark. Nothing in the
//! harness absorbs an error to report a partial success.

use std::path::PathBuf;
use std::time::Duration;

/// Error type for harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Required environment input is missing. Not a defect.
    #[error("Skipped: {0}")]
    Skipped(String),

    /// A retryable failure kept recurring until the attempt budget ran out.
    #[error(
        "{verb} failed after {attempts} attempts (last retryable reason: {reason})\n--- tool output ---\n{output}"
    )]
    RetriesExhausted {
        verb: String,
        attempts: u32,
        reason: String,
        output: String,
    },

    /// The tool failed with output that matched no retryable signature.
    #[error("{verb} failed with exit code {exit_code}\n--- tool output ---\n{output}")]
    Provisioning {
        verb: String,
        exit_code: i32,
        output: String,
    },

    /// A named output did not have the expected shape.
    #[error("Output '{name}' is not {expected}\n--- tool output ---\n{output}")]
    UnexpectedOutput {
        name: String,
        expected: &'static str,
        output: String,
    },

    /// A consistency wait ran out of time before its condition held.
    #[error("Timed out after {timeout:?} waiting for: {condition} ({checks} checks)")]
    Timeout {
        condition: String,
        timeout: Duration,
        checks: u32,
    },

    /// The predicate of a consistency wait returned an error.
    #[error("Check failed while waiting for {condition}: {source}")]
    PredicateFailed {
        condition: String,
        #[source]
        source: anyhow::Error,
    },

    /// Stage state could not be read or written.
    #[error("Stage state at {} is unusable: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stage '{stage}' failed: {message}")]
    Stage { stage: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Process failed to start: {0}")]
    ProcessStartFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

impl HarnessError {
    /// Whether this error means "skip the test" rather than "fail the test".
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }

    /// Whether this is a consistency-wait timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Verbatim tool output carried by provisioning failures.
    pub fn tool_output(&self) -> Option<&str> {
        match self {
            Self::RetriesExhausted { output, .. }
            | Self::Provisioning { output, .. }
            | Self::UnexpectedOutput { output, .. } => Some(output),
            _ => None,
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}
