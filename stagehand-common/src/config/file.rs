//! Optional TOML configuration file.
//!
//! ```toml
//! [retry]
//! max_retries = 5
//! delay = "15s"
//!
//! [[retry.patterns]]
//! pattern = ".*OperationNotAllowed.*quota.*"
//! reason = "Quota propagation - retrying"
//!
//! [defaults]
//! region = "westeurope"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{HarnessError, HarnessResult};
use crate::retry::RetryPattern;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub retry: RetrySection,
    pub defaults: DefaultsSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    /// Appended after the built-in signatures.
    pub patterns: Vec<RetryPattern>,
    pub max_retries: Option<u32>,
    /// Humantime string, e.g. "10s".
    pub delay: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultsSection {
    pub region: Option<String>,
}

impl FileConfig {
    pub fn parse(contents: &str) -> HarnessResult<Self> {
        toml::from_str(contents).map_err(|e| HarnessError::Config(format!("invalid TOML: {e}")))
    }

    pub fn load(path: &Path) -> HarnessResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&contents).map_err(|e| match e {
            HarnessError::Config(msg) => HarnessError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Parsed retry delay, if one was given.
    pub fn retry_delay(&self) -> HarnessResult<Option<Duration>> {
        self.retry
            .delay
            .as_deref()
            .map(|raw| {
                humantime::parse_duration(raw.trim()).map_err(|e| {
                    HarnessError::Config(format!("invalid retry.delay '{raw}': {e}"))
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let cfg = FileConfig::parse(
            r#"
[retry]
max_retries = 5
delay = "1m 30s"

[[retry.patterns]]
pattern = ".*Conflict.*"
reason = "Conflict - retrying"

[defaults]
region = "westeurope"
"#,
        )
        .unwrap();
        assert_eq!(cfg.retry.max_retries, Some(5));
        assert_eq!(cfg.retry_delay().unwrap(), Some(Duration::from_secs(90)));
        assert_eq!(cfg.retry.patterns[0].reason, "Conflict - retrying");
        assert_eq!(cfg.defaults.region.as_deref(), Some("westeurope"));
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(FileConfig::parse("").unwrap(), FileConfig::default());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = FileConfig::parse("[retry]\nattempts = 4\n").unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn test_bad_delay_reported() {
        let cfg = FileConfig::parse("[retry]\ndelay = \"whenever\"\n").unwrap();
        assert!(cfg.retry_delay().is_err());
    }
}
