//! Test support shared by this workspace's unit and integration tests.

mod log;
mod runner;

pub use log::init_global_test_logging;
pub use runner::ScriptedRunner;
