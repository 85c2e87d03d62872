//! Benchmark harness: repeated deploy/destroy cycles across scale and
//! parallelism sweeps, timed and reported as named metrics.
//!
//! Sweeps only run when `RUN_PERFORMANCE_TESTS` is set; see
//! [`require_performance_tests`].

mod cycle;
mod error;
mod metrics;
mod sweep;

pub use cycle::{ConfigFactory, CycleDriver, FixtureFactory, ProvisionerDriver, SweepPoint};
pub use error::BenchmarkError;
pub use metrics::{BenchmarkRun, CREATION_METRIC, Metric, PointSummary, SweepReport};
pub use sweep::{PARALLEL_PARAMETER, ParallelSweep, ScaleSweep, run_cycle};

use stagehand_common::{HarnessError, HarnessSettings};

/// Gate for performance runs. Returns `Skipped` unless the settings enable
/// them.
pub fn require_performance_tests(settings: &HarnessSettings) -> Result<(), BenchmarkError> {
    settings
        .require_performance_tests()
        .map_err(|e| match e {
            HarnessError::Skipped(reason) => BenchmarkError::Skipped(reason),
            other => BenchmarkError::from(other),
        })
}
