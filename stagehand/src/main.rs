//! Stage and benchmark CLI for infrastructure fixtures.
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use stagehand::benchmarks::require_performance_tests;
use stagehand::commands::{
    self, BenchRequest, CommandError, RunRequest, bench_parallel, bench_scale, parse_var,
};
use stagehand_common::{
    CommandRunner, EnvSource, HarnessSettings, LogConfig, ProcessRunner, init_logging,
};

#[derive(Parser)]
#[command(
    name = "stagehand",
    version,
    about = "Re-entrant deploy/validate/cleanup stages and benchmark sweeps for infrastructure fixtures"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for reports
    #[arg(long, global = true, default_value = "pretty")]
    format: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a fixture and run deploy, validate and cleanup against it
    Run {
        /// Fixture directory to copy
        #[arg(long, required_unless_present = "workdir")]
        fixture: Option<PathBuf>,

        /// Reuse a working directory from an earlier run
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Test name used for logs and the working directory
        #[arg(long, default_value = "stagehand")]
        name: String,

        /// Input variable, NAME=VALUE (repeatable)
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, Value)>,

        /// Run only these stages (repeatable)
        #[arg(long = "stage")]
        stages: Vec<String>,
    },

    /// Print outputs of a deployed working directory
    Output {
        #[arg(long)]
        workdir: PathBuf,

        /// A single output
        #[arg(long)]
        name: Option<String>,
    },

    /// Destroy what a working directory deployed
    Destroy {
        #[arg(long)]
        workdir: PathBuf,
    },

    /// Benchmark sweeps (require RUN_PERFORMANCE_TESTS)
    Bench {
        #[command(subcommand)]
        sweep: BenchCommand,
    },
}

#[derive(Subcommand)]
enum BenchCommand {
    /// Deploy time as a function of one numeric variable
    Scale {
        #[arg(long)]
        fixture: PathBuf,

        /// Variable receiving each point
        #[arg(long = "var")]
        parameter: String,

        /// Comma-separated sweep points
        #[arg(long, value_delimiter = ',', required = true)]
        points: Vec<u64>,

        #[arg(long, default_value_t = 1)]
        iterations: u32,

        /// Fixed input variable, NAME=VALUE (repeatable)
        #[arg(long = "set", value_parser = parse_var)]
        vars: Vec<(String, Value)>,

        /// Fail if the mean deploy time exceeds this, e.g. "15m"
        #[arg(long, value_parser = humantime::parse_duration)]
        budget: Option<std::time::Duration>,
    },

    /// Deploy time under concurrent independent deployments
    Parallel {
        #[arg(long)]
        fixture: PathBuf,

        /// Comma-separated parallelism levels
        #[arg(long, value_delimiter = ',', required = true)]
        counts: Vec<usize>,

        /// Cycles per parallelism level (at least the level; defaults to it)
        #[arg(long)]
        cycles: Option<u32>,

        /// Fixed input variable, NAME=VALUE (repeatable)
        #[arg(long = "set", value_parser = parse_var)]
        vars: Vec<(String, Value)>,

        /// Fail if the mean deploy time exceeds this, e.g. "15m"
        #[arg(long, value_parser = humantime::parse_duration)]
        budget: Option<std::time::Duration>,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum OutputFormat {
    Json,
    Pretty,
}

fn render<T: Serialize>(value: &T, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string(value),
        OutputFormat::Pretty => serde_json::to_string_pretty(value),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let env = EnvSource::process();

    let mut log_config = LogConfig::from_env(&env, "info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    let mut settings = HarnessSettings::from_env(&env)?;
    settings.log_warnings();

    match execute(cli.command, cli.format, &mut settings) {
        Ok(()) => Ok(()),
        Err(e) if e.is_skip() => {
            warn!(reason = %e, "Skipped");
            println!("{e}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn execute(
    command: Commands,
    format: OutputFormat,
    settings: &mut HarnessSettings,
) -> std::result::Result<(), CommandError> {
    // Skips win over a missing tool binary.
    settings.credentials()?;
    if matches!(command, Commands::Bench { .. }) {
        require_performance_tests(settings)?;
    }
    commands::resolve_tool(settings)?;
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);

    match command {
        Commands::Run {
            fixture,
            workdir,
            name,
            vars,
            stages,
        } => {
            let request = RunRequest {
                name,
                fixture,
                workdir,
                vars,
                only_stages: stages,
            };
            let summary = commands::run_stages(settings, &request, runner)?;
            print(&summary, format)?;
        }
        Commands::Output { workdir, name } => {
            let outputs = commands::show_outputs(settings, &workdir, name.as_deref(), runner)?;
            print(&outputs, format)?;
        }
        Commands::Destroy { workdir } => {
            commands::destroy_workdir(settings, &workdir, runner)?;
        }
        Commands::Bench { sweep } => {
            let settings = Arc::new(settings.clone());
            let (report, budget) = match sweep {
                BenchCommand::Scale {
                    fixture,
                    parameter,
                    points,
                    iterations,
                    vars,
                    budget,
                } => {
                    let request = BenchRequest { fixture, vars };
                    let report =
                        bench_scale(settings, &request, &parameter, points, iterations, runner)?;
                    (report, budget)
                }
                BenchCommand::Parallel {
                    fixture,
                    counts,
                    cycles,
                    vars,
                    budget,
                } => {
                    let request = BenchRequest { fixture, vars };
                    let runtime = tokio::runtime::Runtime::new()
                        .map_err(stagehand_common::HarnessError::from)?;
                    let report = runtime.block_on(bench_parallel(
                        settings, &request, counts, cycles, runner,
                    ))?;
                    (report, budget)
                }
            };
            print(&report, format)?;
            if let Some(budget) = budget {
                report.assert_mean_within(budget)?;
                info!(budget = %humantime::format_duration(budget), "Mean deploy time within budget");
            }
        }
    }
    Ok(())
}

fn print<T: Serialize>(value: &T, format: OutputFormat) -> std::result::Result<(), CommandError> {
    let rendered = render(value, format).map_err(stagehand_common::HarnessError::from)?;
    println!("{rendered}");
    Ok(())
}
