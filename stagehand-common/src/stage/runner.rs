//! Named, ordered stages over one test run.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info};

use crate::config::HarnessSettings;
use crate::error::HarnessResult;
use crate::options::InvocationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Ran,
    Skipped,
    Failed,
}

/// What happened to one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub name: String,
    pub status: StageStatus,
    pub duration_ms: u64,
}

/// Runs stages in call order, honoring `SKIP_<stage>` switches.
///
/// Every stage runs unless explicitly skipped. The runner never catches a
/// failing stage for the caller; cleanup after failure belongs to a
/// [`super::DeferredCleanup`] guard.
#[derive(Debug)]
pub struct StageRunner {
    test_name: String,
    skip: BTreeSet<String>,
    records: Mutex<Vec<StageRecord>>,
}

impl StageRunner {
    pub fn new(settings: &HarnessSettings, test_name: impl Into<String>) -> Self {
        Self::with_skips(test_name, settings.skip_stages.iter().cloned())
    }

    pub fn with_skips(
        test_name: impl Into<String>,
        skip: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            skip: skip.into_iter().collect(),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn is_skipped(&self, stage: &str) -> bool {
        self.skip.contains(stage)
    }

    fn record(&self, name: &str, status: StageStatus, duration: Duration) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(StageRecord {
                name: name.to_string(),
                status,
                duration_ms: duration.as_millis() as u64,
            });
    }

    fn timed<T>(&self, name: &str, action: impl FnOnce() -> HarnessResult<T>) -> HarnessResult<T> {
        info!(test = %self.test_name, stage = name, "Running stage");
        let start = Instant::now();
        let result = action();
        let elapsed = start.elapsed();
        match &result {
            Ok(_) => {
                info!(
                    test = %self.test_name,
                    stage = name,
                    duration_ms = elapsed.as_millis() as u64,
                    "Stage completed"
                );
                self.record(name, StageStatus::Ran, elapsed);
            }
            Err(e) => {
                error!(test = %self.test_name, stage = name, error = %e, "Stage failed");
                self.record(name, StageStatus::Failed, elapsed);
            }
        }
        result
    }

    fn skip_logged(&self, name: &str) -> bool {
        if self.is_skipped(name) {
            info!(test = %self.test_name, stage = name, "Skipping stage (SKIP_{name} set)");
            self.record(name, StageStatus::Skipped, Duration::ZERO);
            return true;
        }
        false
    }

    /// Run `action` unless `name` is skipped. Errors propagate unchanged.
    pub fn run_stage<F>(&self, name: &str, action: F) -> HarnessResult<()>
    where
        F: FnOnce() -> HarnessResult<()>,
    {
        if self.skip_logged(name) {
            return Ok(());
        }
        self.timed(name, action)
    }

    /// Run a stage over an immutable config snapshot.
    ///
    /// The action returns `Some(config)` to hand a new snapshot to later
    /// stages or `None` to keep the current one. A skipped stage passes the
    /// snapshot through untouched.
    pub fn run_stage_with<F>(
        &self,
        name: &str,
        snapshot: Arc<InvocationConfig>,
        action: F,
    ) -> HarnessResult<Arc<InvocationConfig>>
    where
        F: FnOnce(Arc<InvocationConfig>) -> HarnessResult<Option<InvocationConfig>>,
    {
        if self.skip_logged(name) {
            return Ok(snapshot);
        }
        let current = Arc::clone(&snapshot);
        let updated = self.timed(name, move || action(current))?;
        Ok(updated.map(Arc::new).unwrap_or(snapshot))
    }

    /// Stage records in execution order.
    pub fn report(&self) -> Vec<StageRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
