//! Stage runner, persisted stage state, working directories and deferred
//! cleanup.

mod cleanup;
mod runner;
mod state;
mod workdir;

pub use cleanup::{CLEANUP_STAGE, DeferredCleanup};
pub use runner::{StageRecord, StageRunner, StageStatus};
pub use state::{CONFIG_KEY, STATE_DIR, StageState};
pub use workdir::Workdir;

/// Conventional stage names.
pub const DEPLOY_STAGE: &str = "deploy";
pub const VALIDATE_STAGE: &str = "validate";
