//! One deploy/destroy cycle: where configs come from and what drives them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use stagehand_common::stage::Workdir;
use stagehand_common::{
    CommandRunner, HarnessResult, HarnessSettings, InvocationConfig, OptionsBuilder,
    ProcessRunner, Provisioner,
};

/// Deploys and destroys one configuration.
pub trait CycleDriver: Send + Sync {
    fn deploy(&self, config: &InvocationConfig) -> HarnessResult<()>;
    fn destroy(&self, config: &InvocationConfig) -> HarnessResult<()>;
}

/// Drives the provisioning tool through the retry engine.
#[derive(Clone)]
pub struct ProvisionerDriver {
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for ProvisionerDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionerDriver").finish_non_exhaustive()
    }
}

impl Default for ProvisionerDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisionerDriver {
    pub fn new() -> Self {
        Self::with_runner(Arc::new(ProcessRunner))
    }

    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn provisioner(&self, config: &InvocationConfig) -> HarnessResult<Provisioner> {
        Provisioner::with_runner(config.clone(), Arc::clone(&self.runner))
    }
}

impl CycleDriver for ProvisionerDriver {
    fn deploy(&self, config: &InvocationConfig) -> HarnessResult<()> {
        self.provisioner(config)?.init_and_apply().map(|_| ())
    }

    fn destroy(&self, config: &InvocationConfig) -> HarnessResult<()> {
        self.provisioner(config)?.destroy().map(|_| ())
    }
}

/// Coordinates of one cycle within a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepPoint {
    pub parameter: String,
    pub value: u64,
    pub iteration: u32,
}

/// Produces a fresh, unshared config for every cycle.
///
/// Parallel sweeps call `build` from inside each worker, so no two cycles
/// ever see the same config or working directory.
pub trait ConfigFactory: Send + Sync {
    fn build(&self, point: &SweepPoint) -> HarnessResult<InvocationConfig>;

    /// Called after the cycle's destroy.
    fn release(&self, _config: &InvocationConfig) -> HarnessResult<()> {
        Ok(())
    }
}

impl<F> ConfigFactory for F
where
    F: Fn(&SweepPoint) -> HarnessResult<InvocationConfig> + Send + Sync,
{
    fn build(&self, point: &SweepPoint) -> HarnessResult<InvocationConfig> {
        self(point)
    }
}

type PointVars = dyn Fn(u64) -> Vec<(String, Value)> + Send + Sync;

/// Copies a fixture per cycle and builds its config from harness settings.
pub struct FixtureFactory {
    settings: Arc<HarnessSettings>,
    fixture_dir: PathBuf,
    vars: Vec<(String, Value)>,
    point_vars: Option<Box<PointVars>>,
}

impl std::fmt::Debug for FixtureFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureFactory")
            .field("fixture_dir", &self.fixture_dir)
            .field("vars", &self.vars)
            .finish_non_exhaustive()
    }
}

impl FixtureFactory {
    pub fn new(settings: Arc<HarnessSettings>, fixture_dir: impl AsRef<Path>) -> Self {
        Self {
            settings,
            fixture_dir: fixture_dir.as_ref().to_path_buf(),
            vars: Vec::new(),
            point_vars: None,
        }
    }

    /// Fixed variable applied to every cycle.
    #[must_use]
    pub fn var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.push((name.into(), value.into()));
        self
    }

    /// Pass the sweep value straight through as the number variable `name`.
    #[must_use]
    pub fn point_var(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.point_vars(move |value| vec![(name.clone(), Value::from(value))])
    }

    /// Map the sweep value to any set of variables, e.g. a list of `n`
    /// container definitions.
    #[must_use]
    pub fn point_vars<F>(mut self, mapping: F) -> Self
    where
        F: Fn(u64) -> Vec<(String, Value)> + Send + Sync + 'static,
    {
        self.point_vars = Some(Box::new(mapping));
        self
    }
}

impl ConfigFactory for FixtureFactory {
    fn build(&self, point: &SweepPoint) -> HarnessResult<InvocationConfig> {
        let test_name = format!("{}-{}-{}", point.parameter, point.value, point.iteration);
        let workdir = Workdir::copy_fixture_to_temp(
            &self.settings.work_root.value,
            &self.fixture_dir,
            &test_name,
        )?;

        let mut builder = OptionsBuilder::new(&self.settings, &workdir).vars(self.vars.clone());
        if let Some(mapping) = &self.point_vars {
            builder = builder.vars(mapping(point.value));
        }
        match builder.build() {
            Ok(config) => {
                debug!(workdir = %workdir.display(), suffix = config.suffix().unwrap_or_default(), "Built cycle config");
                Ok(config)
            }
            Err(e) => {
                let _ = Workdir::remove(&workdir);
                Err(e)
            }
        }
    }

    fn release(&self, config: &InvocationConfig) -> HarnessResult<()> {
        if self.settings.keep_workdir.value {
            return Ok(());
        }
        if let Err(e) = Workdir::remove(&config.working_dir) {
            warn!(workdir = %config.working_dir.display(), error = %e, "Failed to remove cycle workdir");
        }
        Ok(())
    }
}
