//! Stagehand
//!
//! Benchmark sweeps over infrastructure fixtures and the command surface
//! behind the `stagehand` binary.

pub mod benchmarks;
pub mod commands;

pub use benchmarks::{
    BenchmarkError, BenchmarkRun, ConfigFactory, CycleDriver, FixtureFactory, ParallelSweep,
    ProvisionerDriver, ScaleSweep, SweepReport,
};
pub use commands::{CommandError, RunRequest, RunSummary};
