//! Harness settings, built once per process from an [`EnvSource`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use super::env::{EnvParser, parse_bool};
use super::file::FileConfig;
use super::source::{EnvSource, Sourced};
use crate::error::{HarnessError, HarnessResult};
use crate::retry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, RetryPattern, RetrySettings};

pub const ENV_SUBSCRIPTION_ID: &str = "ARM_SUBSCRIPTION_ID";
pub const ENV_TENANT_ID: &str = "ARM_TENANT_ID";
pub const ENV_CLIENT_ID: &str = "ARM_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "ARM_CLIENT_SECRET";
pub const ENV_LOCATION: &str = "ARM_LOCATION";
pub const ENV_RUN_PERFORMANCE_TESTS: &str = "RUN_PERFORMANCE_TESTS";
pub const SKIP_STAGE_PREFIX: &str = "SKIP_";
pub const ENV_TMPDIR: &str = "TMPDIR";

pub const DEFAULT_REGION: &str = "northeurope";
pub const DEFAULT_TOOL: &str = "terraform";

/// Service-principal credentials handed to the provisioning tool.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub subscription_id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("subscription_id", &self.subscription_id)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

impl Credentials {
    /// Read all four variables, or skip naming every missing one.
    pub fn require(env: &EnvSource) -> HarnessResult<Self> {
        let names = [
            ENV_SUBSCRIPTION_ID,
            ENV_TENANT_ID,
            ENV_CLIENT_ID,
            ENV_CLIENT_SECRET,
        ];
        let missing: Vec<&str> = names
            .iter()
            .copied()
            .filter(|name| env.non_empty(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(HarnessError::Skipped(format!(
                "cloud credentials not set: {}",
                missing.join(", ")
            )));
        }

        let get = |name: &str| env.non_empty(name).unwrap_or_default().to_string();
        Ok(Self {
            subscription_id: get(ENV_SUBSCRIPTION_ID),
            tenant_id: get(ENV_TENANT_ID),
            client_id: get(ENV_CLIENT_ID),
            client_secret: get(ENV_CLIENT_SECRET),
        })
    }

    /// Variables exported to the tool process.
    pub fn to_env(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (ENV_SUBSCRIPTION_ID.to_string(), self.subscription_id.clone()),
            (ENV_TENANT_ID.to_string(), self.tenant_id.clone()),
            (ENV_CLIENT_ID.to_string(), self.client_id.clone()),
            (ENV_CLIENT_SECRET.to_string(), self.client_secret.clone()),
        ])
    }
}

/// Everything the harness reads from its environment.
#[derive(Debug, Clone)]
pub struct HarnessSettings {
    credentials: Result<Credentials, String>,
    pub default_region: Sourced<String>,
    /// Stage names with a truthy `SKIP_<stage>` variable or listed in
    /// `STAGEHAND_SKIP_STAGES`.
    pub skip_stages: BTreeSet<String>,
    pub run_performance_tests: bool,
    pub tool_binary: Sourced<String>,
    pub max_retries: Sourced<u32>,
    pub retry_delay: Sourced<Duration>,
    /// Retry signatures added by the config file.
    pub extra_patterns: Vec<RetryPattern>,
    pub work_root: Sourced<PathBuf>,
    pub keep_workdir: Sourced<bool>,
    pub log_level: Sourced<String>,
    pub config_file: Option<PathBuf>,
    /// Problems found while parsing; values fell back to defaults.
    pub warnings: Vec<String>,
}

impl HarnessSettings {
    /// Build settings from a snapshot. A config file named by
    /// `STAGEHAND_CONFIG` is merged beneath the environment; an unreadable
    /// or invalid file is an error.
    pub fn from_env(env: &EnvSource) -> HarnessResult<Self> {
        let mut parser = EnvParser::new(env);
        let tool_binary = parser.get_string("TOOL", DEFAULT_TOOL);
        let max_retries = parser.get_u32_range("MAX_RETRIES", DEFAULT_MAX_RETRIES, 0, 20);
        let retry_delay = parser.get_duration("RETRY_DELAY", DEFAULT_RETRY_DELAY);
        let default_work_root = env
            .non_empty(ENV_TMPDIR)
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
            .join("stagehand");
        let work_root = parser.get_path(
            "WORK_ROOT",
            &default_work_root.to_string_lossy(),
            false,
        );
        let keep_workdir = parser.get_bool("KEEP_WORKDIR", false);
        let log_level = parser.get_log_level("LOG_LEVEL", "info");
        let config_file = parser.get_optional_string("CONFIG").into_inner();
        let listed_skips = parser.get_string_list("SKIP_STAGES", Vec::new()).into_inner();
        let mut warnings: Vec<String> = parser.take_errors().iter().map(|e| e.to_string()).collect();

        let mut provider = EnvParser::with_prefix(env, "");
        let mut default_region = provider.get_string(ENV_LOCATION, DEFAULT_REGION);
        if default_region.value.trim().is_empty() {
            default_region = Sourced::default_value(DEFAULT_REGION.to_string());
        }
        let run_performance_tests = provider.get_bool(ENV_RUN_PERFORMANCE_TESTS, false).value;
        warnings.extend(provider.take_errors().iter().map(|e| e.to_string()));

        let mut skip_stages: BTreeSet<String> = env
            .with_prefix(SKIP_STAGE_PREFIX)
            .filter_map(|(stage, value)| match parse_bool(value) {
                Some(true) => Some(stage.to_string()),
                Some(false) => None,
                None => {
                    warnings.push(format!(
                        "Ignoring {SKIP_STAGE_PREFIX}{stage}='{value}': expected a boolean"
                    ));
                    None
                }
            })
            .collect();
        skip_stages.extend(listed_skips);

        let mut settings = Self {
            credentials: Credentials::require(env).map_err(|e| match e {
                HarnessError::Skipped(reason) => reason,
                other => other.to_string(),
            }),
            default_region,
            skip_stages,
            run_performance_tests,
            tool_binary,
            max_retries,
            retry_delay,
            extra_patterns: Vec::new(),
            work_root,
            keep_workdir,
            log_level,
            config_file: config_file.map(|p| super::env::expand_home(&p)),
            warnings,
        };

        if let Some(path) = settings.config_file.clone() {
            settings.merge_file(&FileConfig::load(&path)?)?;
        }
        Ok(settings)
    }

    /// Layer file values under any environment-provided ones.
    pub fn merge_file(&mut self, file: &FileConfig) -> HarnessResult<()> {
        if let Some(n) = file.retry.max_retries
            && n > 20
        {
            return Err(HarnessError::Config(format!(
                "retry.max_retries must be in 0..=20, got {n}"
            )));
        }
        self.max_retries = self.max_retries.clone().or_file(file.retry.max_retries);
        self.retry_delay = self.retry_delay.clone().or_file(file.retry_delay()?);
        self.default_region = self
            .default_region
            .clone()
            .or_file(file.defaults.region.clone());
        self.extra_patterns.extend(file.retry.patterns.iter().cloned());
        Ok(())
    }

    /// Credentials, or a skip naming the missing variables.
    pub fn credentials(&self) -> HarnessResult<&Credentials> {
        self.credentials
            .as_ref()
            .map_err(|reason| HarnessError::Skipped(reason.clone()))
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_ok()
    }

    pub fn should_skip(&self, stage: &str) -> bool {
        self.skip_stages.contains(stage)
    }

    /// Skip unless performance runs were requested.
    pub fn require_performance_tests(&self) -> HarnessResult<()> {
        if self.run_performance_tests {
            Ok(())
        } else {
            Err(HarnessError::Skipped(format!(
                "performance tests disabled; set {ENV_RUN_PERFORMANCE_TESTS}=true"
            )))
        }
    }

    /// Default retry settings tuned by these settings.
    pub fn retry_settings(&self) -> RetrySettings {
        RetrySettings::azure_defaults()
            .with_patterns(self.extra_patterns.iter().cloned())
            .with_max_retries(self.max_retries.value)
            .with_delay(self.retry_delay.value)
    }

    /// Emit collected warnings through tracing.
    pub fn log_warnings(&self) {
        for warning in &self.warnings {
            warn!(%warning, "Configuration warning");
        }
    }

    /// Replace the credentials. Used by tests and embedding callers.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Ok(credentials);
        self
    }
}
