//! Stagehand common library
//!
//! Orchestration for infrastructure-module integration tests: a stage runner
//! that makes long cloud deployments re-entrant, a retry engine around the
//! provisioning tool, and a consistency poller for eventually-consistent
//! resource state.

pub mod config;
pub mod error;
pub mod logging;
pub mod options;
pub mod poll;
pub mod retry;
pub mod stage;
pub mod testing;
pub mod tool;
pub mod util;

pub use config::{Credentials, EnvSource, HarnessSettings};
pub use error::{HarnessError, HarnessResult};
pub use logging::{LogConfig, LoggingGuards, init_logging};
pub use options::{InvocationConfig, OptionsBuilder, name_suffix, resource_name};
pub use poll::{PollCondition, PollReport, PollState, wait_for_command, wait_for_deletion, wait_until};
pub use retry::{
    Classification, ErrorClassifier, PatternClassifier, RetryOutcome, RetryPattern, RetryPolicy,
    RetrySettings, invoke_with_retry,
};
pub use stage::{DeferredCleanup, StageRecord, StageRunner, StageState, StageStatus, Workdir};
pub use tool::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner, Provisioner, Verb};
pub use util::mask_sensitive;
