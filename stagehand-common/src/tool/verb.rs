//! Provisioning-tool verbs and their flags.

use std::fmt;

use super::vars::VAR_FILE_NAME;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Init,
    Plan,
    Apply,
    Destroy,
    Output,
    Validate,
}

/// Flags that vary per invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerbFlags {
    pub no_color: bool,
    pub upgrade: bool,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Output => "output",
            Self::Validate => "validate",
        }
    }

    /// Whether the verb reads input variables.
    pub fn takes_vars(self) -> bool {
        matches!(self, Self::Plan | Self::Apply | Self::Destroy)
    }

    /// Whether failures go through the retry engine.
    pub fn retries(self) -> bool {
        !matches!(self, Self::Output)
    }

    /// Arguments after the program name.
    pub fn args(self, flags: VerbFlags) -> Vec<String> {
        let mut args = vec![self.as_str().to_string()];
        match self {
            Self::Init => {
                args.push("-input=false".into());
                if flags.upgrade {
                    args.push("-upgrade".into());
                }
            }
            Self::Plan => args.push("-input=false".into()),
            Self::Apply | Self::Destroy => {
                args.push("-input=false".into());
                args.push("-auto-approve".into());
            }
            Self::Output => args.push("-json".into()),
            Self::Validate => {}
        }
        if self.takes_vars() {
            args.push(format!("-var-file={VAR_FILE_NAME}"));
        }
        if flags.no_color {
            args.push("-no-color".into());
        }
        args
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
