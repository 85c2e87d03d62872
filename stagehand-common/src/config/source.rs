//! Value provenance and the environment snapshot used by every parser.

use std::collections::BTreeMap;
use std::fmt;

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::File => write!(f, "file"),
            Self::Environment => write!(f, "environment"),
        }
    }
}

/// A value tagged with its source.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    /// Variable name when the value came from the environment.
    pub env_var: Option<String>,
}

impl<T> Sourced<T> {
    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
            env_var: None,
        }
    }

    pub fn from_env(value: T, env_var: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Environment,
            env_var: Some(env_var.into()),
        }
    }

    pub fn from_file(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::File,
            env_var: None,
        }
    }

    /// Replace a default with a file-provided value. Environment values win.
    pub fn or_file(self, file_value: Option<T>) -> Self {
        match (self.source, file_value) {
            (ConfigSource::Default, Some(value)) => Self::from_file(value),
            _ => self,
        }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Immutable snapshot of environment variables.
///
/// The process environment is captured exactly once, at the options entry
/// point. Tests build snapshots from literal pairs instead of mutating the
/// real environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSource {
    vars: BTreeMap<String, String>,
}

impl EnvSource {
    /// Snapshot the current process environment.
    pub fn process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Build a snapshot from explicit pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Non-empty value of a variable.
    pub fn non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).map(str::trim).filter(|v| !v.is_empty())
    }

    /// All variables whose name starts with `prefix`, with the prefix stripped.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.vars.iter().filter_map(move |(k, v)| {
            k.strip_prefix(prefix)
                .filter(|rest| !rest.is_empty())
                .map(|rest| (rest, v.as_str()))
        })
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}
