//! In-memory [`CommandRunner`] for tests that must not start real tools.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::error::HarnessResult;
use crate::tool::{CommandOutput, CommandRunner, CommandSpec};

/// Replays scripted results in order, then repeats the last one.
///
/// With an empty script every call succeeds with empty output. Every
/// command is recorded for later inspection.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    script: Mutex<VecDeque<CommandOutput>>,
    last: Mutex<Option<CommandOutput>>,
    seen: Mutex<Vec<CommandSpec>>,
    latency: Duration,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one result.
    #[must_use]
    pub fn then(self, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(CommandOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                duration: self.latency,
            });
        self
    }

    /// Queue a failure with `stderr`, exit code 1.
    #[must_use]
    pub fn then_fail(self, stderr: &str) -> Self {
        self.then(1, "", stderr)
    }

    #[must_use]
    pub fn then_ok(self) -> Self {
        self.then(0, "", "")
    }

    /// Sleep this long in every call, like a slow tool.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// First argument of every recorded command.
    pub fn verbs(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter_map(|c| c.args.first().cloned())
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &CommandSpec) -> HarnessResult<CommandOutput> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.clone());
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }

        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let output = match next {
            Some(output) => {
                *last = Some(output.clone());
                output
            }
            None => last.clone().unwrap_or(CommandOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration: self.latency,
            }),
        };
        Ok(CommandOutput {
            duration: self.latency,
            ..output
        })
    }
}
