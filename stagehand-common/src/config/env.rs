//! Environment variable parsing with type safety.
//!
//! Reads from an [`EnvSource`] snapshot, never from the live process
//! environment, and collects errors so all issues can be reported at once.

use super::source::{ConfigSource, EnvSource, Sourced};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Path does not exist.
    #[error("Path not found for {var}: {path}")]
    PathNotFound { var: String, path: PathBuf },

    /// Invalid duration format.
    #[error("Invalid duration for {var}: {value}")]
    InvalidDuration { var: String, value: String },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    /// Invalid log level.
    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

/// Type-safe environment variable parser.
pub struct EnvParser<'a> {
    env: &'a EnvSource,
    prefix: &'static str,
    errors: Vec<EnvError>,
}

/// Parse a boolean the way every getter here does.
///
/// Accepts: 1, true, yes, on (for true)
///          0, false, no, off, "" (for false)
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

impl<'a> EnvParser<'a> {
    /// Create a new parser with the STAGEHAND_ prefix.
    pub fn new(env: &'a EnvSource) -> Self {
        Self::with_prefix(env, "STAGEHAND_")
    }

    /// Create a parser with a custom prefix (empty for provider variables).
    pub fn with_prefix(env: &'a EnvSource, prefix: &'static str) -> Self {
        Self {
            env,
            prefix,
            errors: Vec::new(),
        }
    }

    /// Get all accumulated errors.
    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    /// Check if any errors occurred.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn lookup(&self, var_name: &str) -> Option<String> {
        self.env.get(var_name).map(str::to_string)
    }

    /// Get a string value with default.
    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        match self.lookup(&var_name) {
            Some(value) => Sourced::from_env(value, var_name),
            None => Sourced::default_value(default.to_string()),
        }
    }

    /// Get a boolean value with default.
    pub fn get_bool(&mut self, name: &str, default: bool) -> Sourced<bool> {
        let var_name = self.var_name(name);
        match self.lookup(&var_name) {
            Some(value) => {
                let parsed = match parse_bool(&value) {
                    Some(parsed) => parsed,
                    None => {
                        self.errors.push(EnvError::InvalidValue {
                            var: var_name.clone(),
                            expected: "boolean (true/false/1/0/yes/no)".to_string(),
                            value: value.clone(),
                        });
                        default
                    }
                };
                Sourced::from_env(parsed, var_name)
            }
            None => Sourced::default_value(default),
        }
    }

    /// Get a u32 value with default and range validation.
    pub fn get_u32_range(&mut self, name: &str, default: u32, min: u32, max: u32) -> Sourced<u32> {
        let var_name = self.var_name(name);
        match self.lookup(&var_name) {
            Some(value) => match value.trim().parse::<u32>() {
                Ok(n) if n >= min && n <= max => Sourced::from_env(n, var_name),
                Ok(n) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name.clone(),
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    Sourced::default_value(default)
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name.clone(),
                        expected: "unsigned 32-bit integer".to_string(),
                        value,
                    });
                    Sourced::default_value(default)
                }
            },
            None => Sourced::default_value(default),
        }
    }

    /// Get a duration written in humantime form ("10s", "2m 30s", "500ms").
    pub fn get_duration(&mut self, name: &str, default: Duration) -> Sourced<Duration> {
        let var_name = self.var_name(name);
        match self.lookup(&var_name) {
            Some(value) => match humantime::parse_duration(value.trim()) {
                Ok(duration) => Sourced::from_env(duration, var_name),
                Err(_) => {
                    self.errors.push(EnvError::InvalidDuration {
                        var: var_name.clone(),
                        value,
                    });
                    Sourced::default_value(default)
                }
            },
            None => Sourced::default_value(default),
        }
    }

    /// Get a path value with ~ expansion.
    ///
    /// If `must_exist` is true, records an error if the path doesn't exist.
    pub fn get_path(&mut self, name: &str, default: &str, must_exist: bool) -> Sourced<PathBuf> {
        let var_name = self.var_name(name);
        let (value, source) = match self.lookup(&var_name) {
            Some(v) => (v, ConfigSource::Environment),
            None => (default.to_string(), ConfigSource::Default),
        };

        let expanded = expand_home(&value);

        if must_exist && !expanded.exists() {
            self.errors.push(EnvError::PathNotFound {
                var: var_name.clone(),
                path: expanded.clone(),
            });
        }

        if source == ConfigSource::Environment {
            Sourced::from_env(expanded, var_name)
        } else {
            Sourced::default_value(expanded)
        }
    }

    /// Get a log level value with validation.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        match self.lookup(&var_name) {
            Some(value) => {
                let lower = value.trim().to_lowercase();
                match lower.as_str() {
                    "trace" | "debug" | "info" | "warn" | "error" | "off" => {
                        Sourced::from_env(lower, var_name)
                    }
                    _ => {
                        self.errors.push(EnvError::InvalidLogLevel {
                            var: var_name.clone(),
                            value: value.clone(),
                        });
                        Sourced::default_value(default.to_string())
                    }
                }
            }
            None => Sourced::default_value(default.to_string()),
        }
    }

    /// Get a comma-separated list. Items are trimmed and empty items dropped.
    pub fn get_string_list(&mut self, name: &str, default: Vec<String>) -> Sourced<Vec<String>> {
        let var_name = self.var_name(name);
        match self.lookup(&var_name) {
            Some(value) => {
                let items = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                Sourced::from_env(items, var_name)
            }
            None => Sourced::default_value(default),
        }
    }

    /// Get an optional string (None if not set or empty).
    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        let var_name = self.var_name(name);
        match self.lookup(&var_name) {
            Some(value) if value.trim().is_empty() => Sourced::from_env(None, var_name),
            Some(value) => Sourced::from_env(Some(value), var_name),
            None => Sourced::default_value(None),
        }
    }
}

pub(crate) fn expand_home(value: &str) -> PathBuf {
    if let Some(stripped) = value.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(value)
}
