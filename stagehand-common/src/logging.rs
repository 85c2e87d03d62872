//! Tracing subscriber setup for binaries.

use std::path::PathBuf;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{EnvParser, EnvSource};

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter directive: a level ("debug") or a full EnvFilter string.
    pub level: String,
    /// JSON lines instead of human-readable output.
    pub json: bool,
    /// Also write to this file through a non-blocking appender.
    pub file: Option<PathBuf>,
    /// Write to stderr.
    pub stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
            stderr: false,
        }
    }
}

impl LogConfig {
    /// Read `STAGEHAND_LOG_LEVEL`, `STAGEHAND_LOG_FORMAT` (`json` or `text`)
    /// and `STAGEHAND_LOG_FILE`.
    pub fn from_env(env: &EnvSource, default_level: &str) -> Self {
        let mut parser = EnvParser::new(env);
        let level = parser.get_log_level("LOG_LEVEL", default_level).into_inner();
        let json = parser
            .get_string("LOG_FORMAT", "text")
            .value
            .eq_ignore_ascii_case("json");
        let file = parser
            .get_optional_string("LOG_FILE")
            .into_inner()
            .map(|p| crate::config::env::expand_home(&p));
        Self {
            level,
            json,
            file,
            stderr: false,
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    #[must_use]
    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }
}

/// Keeps background writers alive; drop at process exit to flush.
#[derive(Debug, Default)]
pub struct LoggingGuards {
    _file: Option<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<LoggingGuards> {
    let filter = EnvFilter::try_new(&config.level)
        .with_context(|| format!("invalid log filter '{}'", config.level))?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guards = LoggingGuards::default();

    if config.stderr {
        let layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
        layers.push(if config.json {
            layer.json().boxed()
        } else {
            layer.compact().boxed()
        });
    }

    if let Some(path) = &config.file {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let name = path
            .file_name()
            .with_context(|| format!("log file path {} has no file name", path.display()))?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
        let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
        layers.push(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_thread_ids(true)
                .boxed(),
        );
        guards._file = Some(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(guards)
}
