//! Retry engine for the provisioning tool.

mod classifier;
mod engine;
mod policy;

pub use classifier::{Classification, ErrorClassifier, PatternClassifier, RetryPattern};
pub use engine::{RetryOutcome, invoke_with_retry};
pub use policy::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, RetryPolicy, RetrySettings};
