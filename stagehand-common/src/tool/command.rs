//! Subprocess execution with output capture.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{HarnessError, HarnessResult};
use crate::util::mask_sensitive;

/// Exit code reported when a probe is killed after its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// A command to run, fully described.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Kill the process after this long. Provisioning verbs leave it unset.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Command line with secrets masked, for logs.
    pub fn display(&self) -> String {
        mask_sensitive(&format!("{} {}", self.program, self.args.join(" ")))
    }
}

/// Result of a command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    /// Check if the command succeeded (exit code 0)
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined output (stdout then stderr), the text used for classification.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Runs commands. The seam between the harness and real processes.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &CommandSpec) -> HarnessResult<CommandOutput>;
}

/// Runs commands as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    fn read_to_string<R: Read>(reader: &mut R) -> String {
        let mut buffer = Vec::new();
        if reader.read_to_end(&mut buffer).is_ok() {
            String::from_utf8_lossy(&buffer).to_string()
        } else {
            String::new()
        }
    }

    fn join_output(handle: Option<thread::JoinHandle<String>>) -> String {
        match handle {
            Some(handle) => handle.join().unwrap_or_default(),
            None => String::new(),
        }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, spec: &CommandSpec) -> HarnessResult<CommandOutput> {
        debug!(command = %spec.display(), cwd = ?spec.cwd, "Executing command");
        let start = Instant::now();

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().map_err(|e| {
            HarnessError::ProcessStartFailed(format!("{}: {e}", spec.program))
        })?;

        // Drain both pipes on their own threads so a chatty child never
        // blocks on a full pipe buffer.
        let stdout_handle = child
            .stdout
            .take()
            .map(|mut stdout| thread::spawn(move || Self::read_to_string(&mut stdout)));
        let stderr_handle = child
            .stderr
            .take()
            .map(|mut stderr| thread::spawn(move || Self::read_to_string(&mut stderr)));

        let mut timed_out = false;
        let status = match spec.timeout {
            None => Some(child.wait()?),
            Some(limit) => loop {
                if let Some(status) = child.try_wait()? {
                    break Some(status);
                }
                if start.elapsed() >= limit {
                    timed_out = true;
                    let _ = child.kill();
                    break child.wait().ok();
                }
                thread::sleep(Duration::from_millis(10));
            },
        };

        let duration = start.elapsed();
        let stdout = Self::join_output(stdout_handle);
        let mut stderr = Self::join_output(stderr_handle);
        if timed_out {
            if !stderr.is_empty() {
                stderr.push('\n');
            }
            stderr.push_str(&format!("Process timed out after {:?}.", spec.timeout));
        }

        let exit_code = status
            .and_then(|s| s.code())
            .unwrap_or(if timed_out { TIMEOUT_EXIT_CODE } else { -1 });

        debug!(
            program = %spec.program,
            exit_code,
            duration_ms = duration.as_millis() as u64,
            timed_out,
            "Command completed"
        );
        for line in stderr.lines() {
            trace!(program = %spec.program, "stderr: {}", mask_sensitive(line));
        }

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_output() {
        let out = CommandOutput {
            exit_code: 1,
            stdout: "plan".into(),
            stderr: "Error: timeout".into(),
            duration: Duration::ZERO,
        };
        assert_eq!(out.combined(), "plan\nError: timeout");
        assert!(!out.success());

        let only_err = CommandOutput {
            stdout: String::new(),
            ..out.clone()
        };
        assert_eq!(only_err.combined(), "Error: timeout");
    }

    #[test]
    fn test_display_masks_secrets() {
        let spec = CommandSpec::new("terraform")
            .arg("apply")
            .arg("-var")
            .arg("client_secret=hunter2");
        let shown = spec.display();
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("terraform apply"));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_captures_output() {
        let out = ProcessRunner
            .run(&CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]))
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let out = ProcessRunner
            .run(
                &CommandSpec::new("sh")
                    .args(["-c", "echo $STAGEHAND_PROBE; pwd"])
                    .env("STAGEHAND_PROBE", "visible")
                    .cwd(dir.path()),
            )
            .unwrap();
        assert!(out.success());
        assert!(out.stdout.contains("visible"));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_timeout() {
        let out = ProcessRunner
            .run(
                &CommandSpec::new("sleep")
                    .arg("5")
                    .timeout(Duration::from_millis(50)),
            )
            .unwrap();
        assert_eq!(out.exit_code, TIMEOUT_EXIT_CODE);
        assert!(out.stderr.contains("timed out"));
    }

    #[test]
    fn test_missing_program_is_start_failure() {
        let err = ProcessRunner
            .run(&CommandSpec::new("stagehand-definitely-missing-binary"))
            .unwrap_err();
        assert!(matches!(err, HarnessError::ProcessStartFailed(_)));
    }
}
