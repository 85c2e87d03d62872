//! Scale and parallelism sweeps.
//!
//! A cycle is: build a fresh config, deploy (timed), destroy (untimed),
//! release the config. A failed deploy still attempts a destroy before the
//! error is returned; a failed destroy stops the sweep.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use stagehand_common::InvocationConfig;

use super::cycle::{ConfigFactory, CycleDriver, SweepPoint};
use super::error::BenchmarkError;
use super::metrics::{BenchmarkRun, CREATION_METRIC, SweepReport};

/// Parameter name used by [`ParallelSweep`].
pub const PARALLEL_PARAMETER: &str = "parallel";

/// Run one cycle at `point`.
pub fn run_cycle(
    sweep: &str,
    point: &SweepPoint,
    factory: &dyn ConfigFactory,
    driver: &dyn CycleDriver,
) -> Result<BenchmarkRun, BenchmarkError> {
    let config = factory.build(point).map_err(|source| BenchmarkError::Setup {
        parameter: point.parameter.clone(),
        value: point.value,
        source,
    })?;

    let started_at = Utc::now();
    let start = Instant::now();
    if let Err(source) = driver.deploy(&config) {
        match driver.destroy(&config) {
            Ok(()) => release(sweep, factory, &config),
            Err(destroy_err) => error!(
                sweep,
                parameter = %point.parameter,
                value = point.value,
                workdir = %config.working_dir.display(),
                error = %destroy_err,
                "Destroy after failed deploy also failed; resources may remain"
            ),
        }
        return Err(BenchmarkError::Deploy {
            parameter: point.parameter.clone(),
            value: point.value,
            iteration: point.iteration,
            source,
        });
    }
    let duration = start.elapsed();

    driver
        .destroy(&config)
        .map_err(|source| BenchmarkError::Destroy {
            parameter: point.parameter.clone(),
            value: point.value,
            iteration: point.iteration,
            source,
        })?;

    release(sweep, factory, &config);

    info!(
        sweep,
        parameter = %point.parameter,
        value = point.value,
        iteration = point.iteration,
        duration_ms = duration.as_millis() as u64,
        "Cycle complete"
    );

    Ok(BenchmarkRun {
        sweep: sweep.to_string(),
        parameter: point.parameter.clone(),
        value: point.value,
        iteration: point.iteration,
        duration,
        started_at,
    })
}

// Only after a successful destroy: a leaked deployment keeps its workdir.
fn release(sweep: &str, factory: &dyn ConfigFactory, config: &InvocationConfig) {
    if let Err(e) = factory.release(config) {
        warn!(sweep, error = %e, "Failed to release cycle config");
    }
}

/// Deploy time as a function of resource count.
#[derive(Debug, Clone)]
pub struct ScaleSweep {
    pub name: String,
    pub parameter: String,
    pub points: Vec<u64>,
    pub iterations: u32,
    pub metric: String,
}

impl ScaleSweep {
    pub fn new(name: impl Into<String>, parameter: impl Into<String>, points: Vec<u64>) -> Self {
        Self {
            name: name.into(),
            parameter: parameter.into(),
            points,
            iterations: 1,
            metric: CREATION_METRIC.to_string(),
        }
    }

    #[must_use]
    pub fn iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    #[must_use]
    pub fn metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = metric.into();
        self
    }

    fn validate(&self) -> Result<(), BenchmarkError> {
        if self.points.is_empty() {
            return Err(BenchmarkError::InvalidSweep(format!(
                "sweep '{}' has no points",
                self.name
            )));
        }
        if self.iterations == 0 {
            return Err(BenchmarkError::InvalidSweep(format!(
                "sweep '{}' has zero iterations",
                self.name
            )));
        }
        Ok(())
    }

    /// Run every point for every iteration, in order.
    pub fn run(
        &self,
        factory: &dyn ConfigFactory,
        driver: &dyn CycleDriver,
    ) -> Result<SweepReport, BenchmarkError> {
        self.validate()?;
        info!(
            sweep = %self.name,
            points = ?self.points,
            iterations = self.iterations,
            "Starting scale sweep"
        );

        let mut runs = Vec::with_capacity(self.points.len() * self.iterations as usize);
        for &value in &self.points {
            for iteration in 0..self.iterations {
                let point = SweepPoint {
                    parameter: self.parameter.clone(),
                    value,
                    iteration,
                };
                runs.push(run_cycle(&self.name, &point, factory, driver)?);
            }
        }
        Ok(SweepReport::new(&self.name, &self.parameter, &self.metric, runs))
    }
}

/// Deploy time under N concurrent independent deployments.
#[derive(Debug, Clone)]
pub struct ParallelSweep {
    pub name: String,
    pub parallelism: Vec<usize>,
    /// Cycles per level. A level `p` always runs at least `p` cycles so that
    /// `p` deployments are in flight together; `None` runs exactly `p`.
    pub cycles_per_point: Option<u32>,
    pub metric: String,
}

impl ParallelSweep {
    pub fn new(
        name: impl Into<String>,
        parallelism: Vec<usize>,
        cycles_per_point: Option<u32>,
    ) -> Self {
        Self {
            name: name.into(),
            parallelism,
            cycles_per_point,
            metric: CREATION_METRIC.to_string(),
        }
    }

    #[must_use]
    pub fn metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = metric.into();
        self
    }

    fn validate(&self) -> Result<(), BenchmarkError> {
        if self.parallelism.is_empty() || self.parallelism.contains(&0) {
            return Err(BenchmarkError::InvalidSweep(format!(
                "sweep '{}' needs at least one non-zero parallelism level",
                self.name
            )));
        }
        if self.cycles_per_point == Some(0) {
            return Err(BenchmarkError::InvalidSweep(format!(
                "sweep '{}' has zero cycles per point",
                self.name
            )));
        }
        Ok(())
    }

    fn cycles_at(&self, level: usize) -> u32 {
        let level = u32::try_from(level).unwrap_or(u32::MAX);
        self.cycles_per_point.map_or(level, |cycles| cycles.max(level))
    }

    /// Run the cycles of each parallelism level with at most that many in
    /// flight. Each worker builds its own config.
    ///
    /// All workers of a level are joined before an error is returned.
    pub async fn run(
        &self,
        factory: Arc<dyn ConfigFactory>,
        driver: Arc<dyn CycleDriver>,
    ) -> Result<SweepReport, BenchmarkError> {
        self.validate()?;
        info!(
            sweep = %self.name,
            parallelism = ?self.parallelism,
            cycles = ?self.cycles_per_point,
            "Starting parallel sweep"
        );

        let mut runs = Vec::new();
        for &level in &self.parallelism {
            runs.extend(self.run_level(level, &factory, &driver).await?);
        }
        Ok(SweepReport::new(
            &self.name,
            PARALLEL_PARAMETER,
            &self.metric,
            runs,
        ))
    }

    async fn run_level(
        &self,
        level: usize,
        factory: &Arc<dyn ConfigFactory>,
        driver: &Arc<dyn CycleDriver>,
    ) -> Result<Vec<BenchmarkRun>, BenchmarkError> {
        let cycles = self.cycles_at(level);
        let permits = Arc::new(Semaphore::new(level));
        let mut workers = JoinSet::new();

        for iteration in 0..cycles {
            let permit = Arc::clone(&permits)
                .acquire_owned()
                .await
                .map_err(|e| BenchmarkError::Worker(e.to_string()))?;
            let factory = Arc::clone(factory);
            let driver = Arc::clone(driver);
            let sweep = self.name.clone();
            let point = SweepPoint {
                parameter: PARALLEL_PARAMETER.to_string(),
                value: level as u64,
                iteration,
            };
            workers.spawn_blocking(move || {
                let _permit = permit;
                run_cycle(&sweep, &point, factory.as_ref(), driver.as_ref())
            });
        }

        let mut runs = Vec::with_capacity(cycles as usize);
        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(run)) => runs.push(run),
                Ok(Err(e)) => {
                    error!(sweep = %self.name, level, error = %e, "Parallel cycle failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(BenchmarkError::Worker(e.to_string()));
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(runs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_common::{HarnessError, HarnessResult, InvocationConfig, RetrySettings};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config(point: &SweepPoint) -> HarnessResult<InvocationConfig> {
        Ok(InvocationConfig {
            working_dir: PathBuf::from(format!("/tmp/{}-{}", point.value, point.iteration)),
            vars: [("count".to_string(), point.value.into())].into(),
            retry: RetrySettings::no_retry(),
            tool: "terraform".into(),
            no_color: true,
            upgrade: false,
            suffix_var: "random_suffix".into(),
            env: Default::default(),
        })
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_deploy_at: Option<u64>,
        fail_destroy: bool,
    }

    impl CycleDriver for Recorder {
        fn deploy(&self, config: &InvocationConfig) -> HarnessResult<()> {
            let count = config.vars["count"].as_u64().unwrap_or_default();
            self.calls.lock().unwrap().push(format!("deploy {count}"));
            if self.fail_deploy_at == Some(count) {
                return Err(HarnessError::Provisioning {
                    verb: "apply".into(),
                    exit_code: 1,
                    output: "QuotaExceeded".into(),
                });
            }
            std::thread::sleep(Duration::from_millis(5));
            Ok(())
        }

        fn destroy(&self, config: &InvocationConfig) -> HarnessResult<()> {
            let count = config.vars["count"].as_u64().unwrap_or_default();
            self.calls.lock().unwrap().push(format!("destroy {count}"));
            if self.fail_destroy {
                return Err(HarnessError::Provisioning {
                    verb: "destroy".into(),
                    exit_code: 1,
                    output: "ScopeLocked".into(),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn test_scale_sweep_cycles_each_point() {
        let driver = Recorder::default();
        let report = ScaleSweep::new("storage", "containers", vec![1, 5])
            .iterations(2)
            .run(&config, &driver)
            .unwrap();

        assert_eq!(report.runs.len(), 4);
        assert_eq!(report.points.len(), 2);
        assert!(report.runs.iter().all(|r| r.duration >= Duration::from_millis(5)));
        assert_eq!(
            *driver.calls.lock().unwrap(),
            vec![
                "deploy 1", "destroy 1", "deploy 1", "destroy 1", "deploy 5", "destroy 5",
                "deploy 5", "destroy 5"
            ]
        );
    }

    #[test]
    fn test_failed_deploy_still_destroys() {
        let driver = Recorder {
            fail_deploy_at: Some(5),
            ..Default::default()
        };
        let err = ScaleSweep::new("storage", "containers", vec![1, 5, 10])
            .run(&config, &driver)
            .unwrap_err();

        assert!(matches!(err, BenchmarkError::Deploy { value: 5, .. }));
        let calls = driver.calls.lock().unwrap();
        assert_eq!(calls.last().map(String::as_str), Some("destroy 5"));
        assert!(!calls.iter().any(|c| c.ends_with(" 10")));
    }

    #[test]
    fn test_destroy_failure_is_surfaced() {
        let driver = Recorder {
            fail_destroy: true,
            ..Default::default()
        };
        let err = ScaleSweep::new("storage", "containers", vec![1])
            .run(&config, &driver)
            .unwrap_err();
        assert!(matches!(err, BenchmarkError::Destroy { .. }));
        assert!(err.may_leak_resources());
    }

    #[test]
    fn test_invalid_sweeps_rejected() {
        let driver = Recorder::default();
        assert!(matches!(
            ScaleSweep::new("s", "p", vec![]).run(&config, &driver),
            Err(BenchmarkError::InvalidSweep(_))
        ));
        assert!(matches!(
            ScaleSweep::new("s", "p", vec![1]).iterations(0).run(&config, &driver),
            Err(BenchmarkError::InvalidSweep(_))
        ));
    }

    struct InFlight {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl CycleDriver for InFlight {
        fn deploy(&self, _config: &InvocationConfig) -> HarnessResult<()> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        fn destroy(&self, _config: &InvocationConfig) -> HarnessResult<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_parallel_sweep_bounds_concurrency() {
        let driver = Arc::new(InFlight {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let report = ParallelSweep::new("parallel", vec![2], Some(6))
            .run(Arc::new(config), driver.clone())
            .await
            .unwrap();

        assert_eq!(report.runs.len(), 6);
        assert_eq!(report.parameter, PARALLEL_PARAMETER);
        assert!(driver.peak.load(Ordering::SeqCst) <= 2);
        assert!(driver.peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_default_cycles_fill_every_level() {
        let driver = Arc::new(InFlight {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let report = ParallelSweep::new("parallel", vec![3], None)
            .run(Arc::new(config), driver.clone())
            .await
            .unwrap();

        assert_eq!(report.runs.len(), 3);
        assert_eq!(driver.peak.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_explicit_cycles_never_below_level() {
        let sweep = ParallelSweep::new("parallel", vec![1, 5], Some(2));
        assert_eq!(sweep.cycles_at(1), 2);
        assert_eq!(sweep.cycles_at(5), 5);
        assert_eq!(ParallelSweep::new("p", vec![4], None).cycles_at(4), 4);
        assert!(matches!(
            ParallelSweep::new("p", vec![4], Some(0)).validate(),
            Err(BenchmarkError::InvalidSweep(_))
        ));
    }

    #[tokio::test]
    async fn test_parallel_sweep_joins_all_before_failing() {
        let driver = Arc::new(Recorder {
            fail_destroy: true,
            ..Default::default()
        });
        let err = ParallelSweep::new("parallel", vec![3], None)
            .run(Arc::new(config), driver.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, BenchmarkError::Destroy { .. }));
        let destroys = driver
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with("destroy"))
            .count();
        assert_eq!(destroys, 3);
    }
}
