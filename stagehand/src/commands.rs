//! Operations behind the CLI subcommands.
//!
//! Each takes settings and a [`CommandRunner`] so the binary can run the real
//! tool and tests can script it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use stagehand_common::stage::{CLEANUP_STAGE, CONFIG_KEY, DEPLOY_STAGE, VALIDATE_STAGE};
use stagehand_common::{
    CommandRunner, DeferredCleanup, HarnessError, HarnessResult, HarnessSettings, OptionsBuilder,
    Provisioner, StageRecord, StageRunner, StageState, Workdir,
};

use crate::benchmarks::{
    BenchmarkError, FixtureFactory, ParallelSweep, ProvisionerDriver, ScaleSweep, SweepReport,
    require_performance_tests,
};

/// Stages `run` knows about, in execution order.
pub const RUN_STAGES: [&str; 3] = [DEPLOY_STAGE, VALIDATE_STAGE, CLEANUP_STAGE];

/// Error returned by any subcommand.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Harness(#[from] HarnessError),

    #[error(transparent)]
    Benchmark(#[from] BenchmarkError),
}

impl CommandError {
    pub fn is_skip(&self) -> bool {
        match self {
            Self::Harness(e) => e.is_skip(),
            Self::Benchmark(e) => e.is_skip(),
        }
    }
}

/// Parse `name=value`. The value is read as JSON when it parses, otherwise
/// kept as a string, so `count=3` is a number and `sku=Standard_LRS` a string.
pub fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty variable name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

/// Resolve the provisioning tool on `PATH` and pin its absolute location.
pub fn resolve_tool(settings: &mut HarnessSettings) -> HarnessResult<PathBuf> {
    let path = which::which(&settings.tool_binary.value).map_err(|e| {
        HarnessError::Config(format!(
            "provisioning tool '{}' not found: {e}",
            settings.tool_binary.value
        ))
    })?;
    settings.tool_binary.value = path.to_string_lossy().into_owned();
    Ok(path)
}

/// Input for [`run_stages`].
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub name: String,
    /// Fixture to copy into a fresh working directory.
    pub fixture: Option<PathBuf>,
    /// Existing working directory from an earlier run; takes precedence.
    pub workdir: Option<PathBuf>,
    pub vars: Vec<(String, Value)>,
    /// When non-empty, stages not listed here are skipped.
    pub only_stages: Vec<String>,
}

impl RunRequest {
    fn skips(&self, settings: &HarnessSettings) -> BTreeSet<String> {
        let mut skip = settings.skip_stages.clone();
        if !self.only_stages.is_empty() {
            skip.extend(
                RUN_STAGES
                    .iter()
                    .filter(|s| !self.only_stages.iter().any(|o| o == *s))
                    .map(|s| s.to_string()),
            );
        }
        skip
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub test: String,
    pub workdir: PathBuf,
    pub stages: Vec<StageRecord>,
    pub outputs: Option<BTreeMap<String, Value>>,
}

/// Reload the persisted config for `workdir` with fresh credentials.
pub fn load_provisioner(
    settings: &HarnessSettings,
    workdir: &Path,
    runner: Arc<dyn CommandRunner>,
) -> HarnessResult<Provisioner> {
    let config = StageState::load_config(workdir, CONFIG_KEY)?
        .with_working_dir(workdir)
        .with_env(settings.credentials()?.to_env());
    Provisioner::with_runner(config, runner)
}

/// Deploy, validate and clean up one fixture.
///
/// Validate reads every output back through a reloaded config, so a run
/// with `SKIP_deploy` validates whatever an earlier run left in `workdir`.
pub fn run_stages(
    settings: &HarnessSettings,
    request: &RunRequest,
    runner: Arc<dyn CommandRunner>,
) -> HarnessResult<RunSummary> {
    settings.credentials()?;
    let workdir = match (&request.workdir, &request.fixture) {
        (Some(dir), _) => {
            Workdir::prepare(dir)?;
            dir.clone()
        }
        (None, Some(fixture)) => {
            Workdir::copy_fixture_to_temp(&settings.work_root.value, fixture, &request.name)?
        }
        (None, None) => {
            return Err(HarnessError::Config(
                "either a fixture or a working directory is required".into(),
            ));
        }
    };

    let stages = StageRunner::with_skips(&request.name, request.skips(settings));
    let mut outputs = None;
    {
        let cleanup = DeferredCleanup::new(&stages, &workdir, || {
            load_provisioner(settings, &workdir, Arc::clone(&runner))?.destroy()?;
            Ok(())
        })
        .keep_workdir(settings.keep_workdir.value);

        stages.run_stage(DEPLOY_STAGE, || {
            // The first saved snapshot is authoritative; cleanup targets its suffix.
            if StageState::exists(&workdir, CONFIG_KEY) {
                info!(workdir = %workdir.display(), "Redeploying with saved config");
            } else {
                let config = OptionsBuilder::new(settings, &workdir)
                    .vars(request.vars.iter().cloned())
                    .build()?;
                StageState::save_config(&workdir, CONFIG_KEY, &config)?;
            }
            load_provisioner(settings, &workdir, Arc::clone(&runner))?.init_and_apply()?;
            Ok(())
        })?;

        stages.run_stage(VALIDATE_STAGE, || {
            let provisioner = load_provisioner(settings, &workdir, Arc::clone(&runner))?;
            outputs = Some(provisioner.output_all()?);
            Ok(())
        })?;

        cleanup.run()?;
    }

    info!(test = %request.name, workdir = %workdir.display(), "Run complete");
    Ok(RunSummary {
        test: request.name.clone(),
        workdir,
        stages: stages.report(),
        outputs,
    })
}

/// All outputs of a deployed working directory, or just `name`.
pub fn show_outputs(
    settings: &HarnessSettings,
    workdir: &Path,
    name: Option<&str>,
    runner: Arc<dyn CommandRunner>,
) -> HarnessResult<Value> {
    let mut outputs = load_provisioner(settings, workdir, runner)?.output_all()?;
    match name {
        None => Ok(Value::Object(outputs.into_iter().collect())),
        Some(name) => outputs
            .remove(name)
            .ok_or_else(|| HarnessError::Config(format!("no output named '{name}'"))),
    }
}

/// Destroy what a working directory deployed. The directory itself stays.
pub fn destroy_workdir(
    settings: &HarnessSettings,
    workdir: &Path,
    runner: Arc<dyn CommandRunner>,
) -> HarnessResult<()> {
    load_provisioner(settings, workdir, runner)?.destroy()?;
    info!(workdir = %workdir.display(), "Destroyed");
    Ok(())
}

/// Input shared by both sweep subcommands.
#[derive(Debug, Clone)]
pub struct BenchRequest {
    pub fixture: PathBuf,
    pub vars: Vec<(String, Value)>,
}

impl BenchRequest {
    fn factory(&self, settings: Arc<HarnessSettings>) -> FixtureFactory {
        self.vars
            .iter()
            .cloned()
            .fold(FixtureFactory::new(settings, &self.fixture), |f, (k, v)| {
                f.var(k, v)
            })
    }
}

/// Sweep `parameter` over `points`, passing each point as that variable.
pub fn bench_scale(
    settings: Arc<HarnessSettings>,
    request: &BenchRequest,
    parameter: &str,
    points: Vec<u64>,
    iterations: u32,
    runner: Arc<dyn CommandRunner>,
) -> Result<SweepReport, BenchmarkError> {
    require_performance_tests(&settings)?;
    let factory = request.factory(settings).point_var(parameter);
    ScaleSweep::new(format!("scale_{parameter}"), parameter, points)
        .iterations(iterations)
        .run(&factory, &ProvisionerDriver::with_runner(runner))
}

/// Run independent deployments at each parallelism level: `cycles` of
/// them, but never fewer than the level itself.
pub async fn bench_parallel(
    settings: Arc<HarnessSettings>,
    request: &BenchRequest,
    counts: Vec<usize>,
    cycles: Option<u32>,
    runner: Arc<dyn CommandRunner>,
) -> Result<SweepReport, BenchmarkError> {
    require_performance_tests(&settings)?;
    let factory = Arc::new(request.factory(settings));
    ParallelSweep::new("parallel", counts, cycles)
        .run(factory, Arc::new(ProvisionerDriver::with_runner(runner)))
        .await
}
