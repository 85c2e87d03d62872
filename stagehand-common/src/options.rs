//! Per-test invocation configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::config::HarnessSettings;
use crate::error::{HarnessError, HarnessResult};
use crate::retry::{RetryPolicy, RetrySettings};

/// Variable that receives the generated suffix unless renamed.
pub const DEFAULT_SUFFIX_VAR: &str = "random_suffix";

/// Variable that receives the region.
pub const LOCATION_VAR: &str = "location";

const SUFFIX_LEN: usize = 12;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Everything needed to drive the tool for one test.
///
/// Persisted between stages by [`crate::stage::StageState`]. `env` carries
/// credentials and is never written to disk; callers re-attach it after a
/// reload with [`InvocationConfig::with_env`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationConfig {
    pub working_dir: PathBuf,
    pub vars: BTreeMap<String, Value>,
    pub retry: RetrySettings,
    pub tool: String,
    pub no_color: bool,
    pub upgrade: bool,
    /// Name of the variable holding the generated suffix.
    pub suffix_var: String,
    #[serde(skip)]
    pub env: BTreeMap<String, String>,
}

impl InvocationConfig {
    pub fn retry_policy(&self) -> HarnessResult<RetryPolicy> {
        self.retry.compile()
    }

    /// The generated name suffix.
    pub fn suffix(&self) -> Option<&str> {
        self.vars.get(&self.suffix_var).and_then(Value::as_str)
    }

    pub fn var_str(&self, name: &str) -> Option<&str> {
        self.vars.get(name).and_then(Value::as_str)
    }

    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    #[must_use]
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }
}

/// Generate a 12-character lowercase base-36 suffix from a v4 UUID.
///
/// About 62 bits of randomness, so concurrent test runs against one
/// subscription do not collide in practice.
pub fn name_suffix() -> String {
    let mut n = Uuid::new_v4().as_u128();
    let mut out = String::with_capacity(SUFFIX_LEN);
    for _ in 0..SUFFIX_LEN {
        out.push(BASE36[(n % 36) as usize] as char);
        n /= 36;
    }
    out
}

/// Build a resource name for services with strict naming rules
/// (storage accounts, key vaults): hyphens removed, lowercased, truncated.
pub fn resource_name(prefix: &str, suffix: &str, max_len: usize) -> String {
    format!("{prefix}{suffix}")
        .chars()
        .filter(|c| *c != '-')
        .flat_map(char::to_lowercase)
        .take(max_len)
        .collect()
}

/// Assembles an [`InvocationConfig`] from settings plus per-test overrides.
#[derive(Debug)]
#[must_use]
pub struct OptionsBuilder<'a> {
    settings: &'a HarnessSettings,
    working_dir: PathBuf,
    vars: BTreeMap<String, Value>,
    region: Option<String>,
    suffix_var: String,
    suffix: Option<String>,
    retry: Option<RetrySettings>,
    no_color: bool,
    upgrade: bool,
}

impl<'a> OptionsBuilder<'a> {
    pub fn new(settings: &'a HarnessSettings, working_dir: impl AsRef<Path>) -> Self {
        Self {
            settings,
            working_dir: working_dir.as_ref().to_path_buf(),
            vars: BTreeMap::new(),
            region: None,
            suffix_var: DEFAULT_SUFFIX_VAR.to_string(),
            suffix: None,
            retry: None,
            no_color: true,
            upgrade: true,
        }
    }

    /// Set one input variable. Explicit variables win over generated ones.
    pub fn var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn vars<I, K>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.vars
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v)));
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Put the generated suffix in a differently named variable.
    pub fn suffix_var(mut self, name: impl Into<String>) -> Self {
        self.suffix_var = name.into();
        self
    }

    /// Use a fixed suffix instead of generating one.
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn retry(mut self, retry: RetrySettings) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn no_color(mut self, no_color: bool) -> Self {
        self.no_color = no_color;
        self
    }

    pub fn upgrade(mut self, upgrade: bool) -> Self {
        self.upgrade = upgrade;
        self
    }

    /// Build the configuration. Skips when credentials are missing.
    pub fn build(self) -> HarnessResult<InvocationConfig> {
        let credentials = self.settings.credentials()?;

        if !self.working_dir.is_dir() {
            return Err(HarnessError::Config(format!(
                "working directory {} does not exist",
                self.working_dir.display()
            )));
        }

        let region = self
            .region
            .unwrap_or_else(|| self.settings.default_region.value.clone());
        let suffix = self.suffix.unwrap_or_else(name_suffix);

        let mut vars = BTreeMap::new();
        vars.insert(self.suffix_var.clone(), Value::String(suffix));
        vars.insert(LOCATION_VAR.to_string(), Value::String(region));
        vars.extend(self.vars);

        let retry = self
            .retry
            .unwrap_or_else(|| self.settings.retry_settings());
        // Reject bad patterns here rather than on the first failure.
        retry.compile()?;

        let config = InvocationConfig {
            working_dir: self.working_dir,
            vars,
            retry,
            tool: self.settings.tool_binary.value.clone(),
            no_color: self.no_color,
            upgrade: self.upgrade,
            suffix_var: self.suffix_var,
            env: credentials.to_env(),
        };
        debug!(
            working_dir = %config.working_dir.display(),
            suffix = config.suffix().unwrap_or_default(),
            vars = config.vars.len(),
            "Built invocation config"
        );
        Ok(config)
    }
}
