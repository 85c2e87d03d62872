//! Scoped cleanup that runs on every exit path.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use super::runner::StageRunner;
use super::workdir::Workdir;
use crate::error::HarnessResult;

/// Name of the stage a [`DeferredCleanup`] runs.
pub const CLEANUP_STAGE: &str = "cleanup";

type CleanupFn<'a> = Box<dyn FnOnce() -> HarnessResult<()> + 'a>;

/// Runs the cleanup stage when dropped, including while unwinding from a
/// panic or a failed assertion.
///
/// A cleanup failure during normal exit is logged at error level; the guard
/// never panics from `drop`. Call [`DeferredCleanup::run`] to observe the
/// result instead. The working directory is removed after a successful
/// cleanup unless `keep_workdir` is set.
#[must_use = "the cleanup runs when this guard is dropped"]
pub struct DeferredCleanup<'a> {
    runner: &'a StageRunner,
    workdir: PathBuf,
    keep_workdir: bool,
    action: Option<CleanupFn<'a>>,
}

impl std::fmt::Debug for DeferredCleanup<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredCleanup")
            .field("workdir", &self.workdir)
            .field("armed", &self.action.is_some())
            .finish()
    }
}

impl<'a> DeferredCleanup<'a> {
    pub fn new<F>(runner: &'a StageRunner, workdir: impl AsRef<Path>, action: F) -> Self
    where
        F: FnOnce() -> HarnessResult<()> + 'a,
    {
        Self {
            runner,
            workdir: workdir.as_ref().to_path_buf(),
            keep_workdir: false,
            action: Some(Box::new(action)),
        }
    }

    /// Leave the working directory on disk after cleanup.
    pub fn keep_workdir(mut self, keep: bool) -> Self {
        self.keep_workdir = keep;
        self
    }

    /// Cancel the cleanup.
    pub fn disarm(mut self) {
        self.action = None;
    }

    /// Run the cleanup now and return its result.
    pub fn run(mut self) -> HarnessResult<()> {
        self.execute()
    }

    fn execute(&mut self) -> HarnessResult<()> {
        let Some(action) = self.action.take() else {
            return Ok(());
        };
        // The action may itself be skipped via SKIP_cleanup; the directory
        // then stays so a later run can destroy what it holds.
        let skipped = self.runner.is_skipped(CLEANUP_STAGE);
        self.runner.run_stage(CLEANUP_STAGE, action)?;
        if !skipped && !self.keep_workdir {
            Workdir::remove(&self.workdir)?;
            info!(workdir = %self.workdir.display(), "Removed working directory");
        }
        Ok(())
    }
}

impl Drop for DeferredCleanup<'_> {
    fn drop(&mut self) {
        if self.action.is_none() {
            return;
        }
        if std::thread::panicking() {
            warn!(
                test = self.runner.test_name(),
                "Running deferred cleanup while unwinding"
            );
        }
        if let Err(e) = self.execute() {
            error!(
                test = self.runner.test_name(),
                workdir = %self.workdir.display(),
                error = %e,
                "Deferred cleanup failed; resources may remain"
            );
        }
    }
}
