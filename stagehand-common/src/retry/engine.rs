//! Bounded retry loop around a single tool invocation.

use std::thread;

use tracing::{debug, info, warn};

use super::classifier::Classification;
use super::policy::RetryPolicy;
use crate::error::{HarnessError, HarnessResult};
use crate::tool::{CommandOutput, CommandRunner, CommandSpec};

/// Successful result of [`invoke_with_retry`].
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub output: CommandOutput,
    /// Attempts used, first try included (1..=max_attempts).
    pub attempts: u32,
}

impl RetryOutcome {
    /// Whether at least one retry was needed.
    pub fn retried(&self) -> bool {
        self.attempts > 1
    }
}

/// Run `command`, retrying classified-transient failures.
///
/// Attempts are numbered from 1. A failure whose combined output matches a
/// retryable signature is retried after `policy.delay` while the attempt
/// number is below `policy.max_attempts()`. Unmatched failures return
/// [`HarnessError::Provisioning`] at once; a retryable failure on the last
/// attempt returns [`HarnessError::RetriesExhausted`]. Both carry the last
/// tool output verbatim. Failing to start the process is not retried.
pub fn invoke_with_retry(
    runner: &dyn CommandRunner,
    command: &CommandSpec,
    verb: &str,
    policy: &RetryPolicy,
) -> HarnessResult<RetryOutcome> {
    let max_attempts = policy.max_attempts();
    let mut attempt: u32 = 1;

    loop {
        debug!(verb, attempt, max_attempts, "Invoking tool");
        let output = runner.run(command)?;

        if output.success() {
            if attempt > 1 {
                info!(verb, attempts = attempt, "Succeeded after retry");
            }
            return Ok(RetryOutcome {
                output,
                attempts: attempt,
            });
        }

        let combined = output.combined();
        match policy.classify(&combined) {
            Classification::Fatal => {
                warn!(
                    verb,
                    attempt,
                    exit_code = output.exit_code,
                    "Tool failed with non-retryable error"
                );
                return Err(HarnessError::Provisioning {
                    verb: verb.to_string(),
                    exit_code: output.exit_code,
                    output: combined,
                });
            }
            Classification::Retryable { reason } if attempt >= max_attempts => {
                warn!(verb, attempts = attempt, %reason, "Retry budget exhausted");
                return Err(HarnessError::RetriesExhausted {
                    verb: verb.to_string(),
                    attempts: attempt,
                    reason,
                    output: combined,
                });
            }
            Classification::Retryable { reason } => {
                warn!(
                    verb,
                    attempt,
                    max_attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    %reason,
                    "Retryable failure"
                );
                if !policy.delay.is_zero() {
                    thread::sleep(policy.delay);
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{PatternClassifier, RetryPattern};
    use crate::testing::ScriptedRunner;
    use std::time::Duration;

    fn policy(max_retries: u32) -> RetryPolicy {
        let classifier = PatternClassifier::new(&[RetryPattern::new(
            ".*TooManyRequests.*",
            "Too many requests - retrying",
        )])
        .unwrap();
        RetryPolicy::new(classifier, max_retries, Duration::ZERO)
    }

    fn cmd() -> CommandSpec {
        CommandSpec::new("terraform").arg("apply")
    }

    #[test]
    fn test_retry_budget_is_retries_plus_one() {
        for n in [0u32, 1, 3, 5] {
            let runner = ScriptedRunner::new().then_fail("Error: TooManyRequests");
            let err = invoke_with_retry(&runner, &cmd(), "apply", &policy(n)).unwrap_err();
            assert_eq!(runner.calls(), n as usize + 1);
            match err {
                HarnessError::RetriesExhausted {
                    attempts, output, ..
                } => {
                    assert_eq!(attempts, n + 1);
                    assert!(output.contains("Error: TooManyRequests"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_unmatched_failure_runs_once() {
        let runner = ScriptedRunner::new().then_fail("Error: InvalidParameter sku");
        let err = invoke_with_retry(&runner, &cmd(), "apply", &policy(3)).unwrap_err();
        assert_eq!(runner.calls(), 1);
        assert!(matches!(err, HarnessError::Provisioning { exit_code: 1, .. }));
        assert!(err.to_string().contains("InvalidParameter sku"));
    }

    #[test]
    fn test_recovers_after_transient_failures() {
        let runner = ScriptedRunner::new()
            .then_fail("TooManyRequests")
            .then_fail("TooManyRequests")
            .then_ok();
        let outcome = invoke_with_retry(&runner, &cmd(), "apply", &policy(3)).unwrap();
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.retried());
        assert_eq!(runner.calls(), 3);
    }

    #[test]
    fn test_fatal_after_retryable_stops() {
        let runner = ScriptedRunner::new()
            .then_fail("TooManyRequests")
            .then(2, "", "Error: quota");
        let err = invoke_with_retry(&runner, &cmd(), "destroy", &policy(5)).unwrap_err();
        assert_eq!(runner.calls(), 2);
        assert!(matches!(err, HarnessError::Provisioning { exit_code: 2, .. }));
    }

    #[test]
    fn test_first_try_success_reports_one_attempt() {
        let runner = ScriptedRunner::new().then_ok();
        let outcome = invoke_with_retry(&runner, &cmd(), "init", &policy(3)).unwrap();
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.retried());
    }

    #[test]
    fn test_delay_applied_between_attempts() {
        let runner = ScriptedRunner::new().then_fail("TooManyRequests");
        let mut p = policy(2);
        p.delay = Duration::from_millis(20);
        let start = std::time::Instant::now();
        let _ = invoke_with_retry(&runner, &cmd(), "apply", &p);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
