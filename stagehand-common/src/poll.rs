//! Consistency poller for eventually-consistent cloud state.
//!
//! A wait is a small state machine: it starts in [`PollState::Waiting`] and
//! ends in exactly one of `Satisfied`, `TimedOut` or `PredicateErrored`.
//! [`PollState::advance`] is pure, so every exit can be tested without
//! sleeping; [`wait_until`] only adds the clock.
//!
//! The predicate treats "not there yet" as `Ok(false)`. Any `Err` is a real
//! failure (authorization, malformed response) and ends the wait at once.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::tool::{CommandRunner, CommandSpec};

/// Interval used when waiting for a resource to disappear.
pub const DEFAULT_DELETION_INTERVAL: Duration = Duration::from_secs(30);

/// What to wait for and for how long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollCondition {
    pub description: String,
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollCondition {
    pub fn new(description: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            description: description.into(),
            interval,
            timeout,
        }
    }

    /// Condition for a deletion wait, polled every [`DEFAULT_DELETION_INTERVAL`].
    pub fn deletion(description: impl Into<String>, timeout: Duration) -> Self {
        Self::new(description, DEFAULT_DELETION_INTERVAL, timeout)
    }
}

/// One event fed to the state machine.
#[derive(Debug)]
pub enum Tick {
    /// The predicate ran and produced this result.
    Checked(anyhow::Result<bool>),
    /// The absolute deadline passed.
    DeadlineReached,
}

/// State of a single wait.
#[derive(Debug)]
pub enum PollState {
    Waiting { checks: u32 },
    Satisfied { checks: u32, elapsed: Duration },
    TimedOut { checks: u32, elapsed: Duration },
    PredicateErrored { checks: u32, error: anyhow::Error },
}

impl Default for PollState {
    fn default() -> Self {
        Self::Waiting { checks: 0 }
    }
}

impl PollState {
    /// Apply one tick. Terminal states absorb every further tick.
    pub fn advance(self, tick: Tick, elapsed: Duration) -> Self {
        let checks = match self {
            Self::Waiting { checks } => checks,
            terminal => return terminal,
        };
        match tick {
            Tick::Checked(Ok(true)) => Self::Satisfied {
                checks: checks + 1,
                elapsed,
            },
            Tick::Checked(Ok(false)) => Self::Waiting { checks: checks + 1 },
            Tick::Checked(Err(error)) => Self::PredicateErrored {
                checks: checks + 1,
                error,
            },
            Tick::DeadlineReached => Self::TimedOut { checks, elapsed },
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Waiting { .. })
    }

    pub fn checks(&self) -> u32 {
        match self {
            Self::Waiting { checks }
            | Self::Satisfied { checks, .. }
            | Self::TimedOut { checks, .. }
            | Self::PredicateErrored { checks, .. } => *checks,
        }
    }

    /// Convert a terminal state into the caller-facing result.
    pub fn into_result(self, condition: &PollCondition) -> HarnessResult<PollReport> {
        match self {
            Self::Satisfied { checks, elapsed } => Ok(PollReport { checks, elapsed }),
            Self::TimedOut { checks, .. } => Err(HarnessError::Timeout {
                condition: condition.description.clone(),
                timeout: condition.timeout,
                checks,
            }),
            Self::PredicateErrored { error, .. } => Err(HarnessError::PredicateFailed {
                condition: condition.description.clone(),
                source: error,
            }),
            Self::Waiting { .. } => Err(HarnessError::Config(format!(
                "wait for '{}' ended before reaching a result",
                condition.description
            ))),
        }
    }
}

/// Summary of a satisfied wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    pub checks: u32,
    pub elapsed: Duration,
}

fn sleep_until(target: Instant) {
    let now = Instant::now();
    if target > now {
        thread::sleep(target - now);
    }
}

/// Block until `check` returns `Ok(true)`, the predicate errors, or the
/// timeout elapses.
///
/// The first check happens one interval after the call. A predicate that
/// runs longer than the interval pushes the next check back rather than
/// overlapping. When the next check would land at or past the deadline the
/// wait sleeps to the deadline and reports [`HarnessError::Timeout`]. A
/// timeout too large to represent as an instant, such as [`Duration::MAX`],
/// means no deadline.
pub fn wait_until<F>(condition: &PollCondition, mut check: F) -> HarnessResult<PollReport>
where
    F: FnMut() -> anyhow::Result<bool>,
{
    if condition.interval.is_zero() {
        return Err(HarnessError::Config(format!(
            "poll interval for '{}' must be greater than zero",
            condition.description
        )));
    }

    debug!(
        condition = %condition.description,
        interval_ms = u64::try_from(condition.interval.as_millis()).unwrap_or(u64::MAX),
        timeout_ms = u64::try_from(condition.timeout.as_millis()).unwrap_or(u64::MAX),
        "Waiting for condition"
    );

    let start = Instant::now();
    let deadline = start.checked_add(condition.timeout);
    let interval_overflow = || {
        HarnessError::Config(format!(
            "poll interval for '{}' is too large",
            condition.description
        ))
    };
    let mut next_tick = start
        .checked_add(condition.interval)
        .ok_or_else(interval_overflow)?;
    let mut state = PollState::default();

    while !state.is_terminal() {
        if let Some(deadline) = deadline.filter(|&d| next_tick >= d) {
            sleep_until(deadline);
            state = state.advance(Tick::DeadlineReached, start.elapsed());
            break;
        }

        sleep_until(next_tick);
        state = state.advance(Tick::Checked(check()), start.elapsed());
        if state.is_terminal() {
            break;
        }

        let now = Instant::now();
        next_tick = next_tick
            .checked_add(condition.interval)
            .ok_or_else(interval_overflow)?
            .max(now);
    }

    match &state {
        PollState::Satisfied { checks, elapsed } => info!(
            condition = %condition.description,
            checks,
            elapsed_ms = elapsed.as_millis() as u64,
            "Condition satisfied"
        ),
        PollState::TimedOut { checks, .. } => warn!(
            condition = %condition.description,
            checks,
            "Timed out waiting for condition"
        ),
        PollState::PredicateErrored { error, .. } => warn!(
            condition = %condition.description,
            error = %error,
            "Condition check failed"
        ),
        PollState::Waiting { .. } => {}
    }

    state.into_result(condition)
}

/// Wait until `exists` reports the resource gone.
pub fn wait_for_deletion<F>(condition: &PollCondition, mut exists: F) -> HarnessResult<PollReport>
where
    F: FnMut() -> anyhow::Result<bool>,
{
    wait_until(condition, || exists().map(|present| !present))
}

/// Wait until `command` exits zero. Non-zero exits mean "not yet"; a command
/// that cannot be started ends the wait with an error.
pub fn wait_for_command(
    runner: &dyn CommandRunner,
    command: &CommandSpec,
    condition: &PollCondition,
) -> HarnessResult<PollReport> {
    wait_until(condition, || {
        let output = runner.run(command)?;
        if !output.success() {
            debug!(
                command = %command.display(),
                exit_code = output.exit_code,
                "Readiness probe not yet passing"
            );
        }
        Ok(output.success())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_advance_to_satisfied() {
        let state = PollState::default()
            .advance(Tick::Checked(Ok(false)), MS)
            .advance(Tick::Checked(Ok(true)), MS * 2);
        assert!(matches!(
            state,
            PollState::Satisfied { checks: 2, elapsed } if elapsed == MS * 2
        ));
    }

    #[test]
    fn test_advance_to_timed_out_keeps_check_count() {
        let state = PollState::default()
            .advance(Tick::Checked(Ok(false)), MS)
            .advance(Tick::DeadlineReached, MS * 5);
        assert!(matches!(state, PollState::TimedOut { checks: 1, .. }));
    }

    #[test]
    fn test_advance_to_predicate_errored() {
        let state = PollState::default().advance(Tick::Checked(Err(anyhow!("403 Forbidden"))), MS);
        match state {
            PollState::PredicateErrored { checks, error } => {
                assert_eq!(checks, 1);
                assert!(error.to_string().contains("403"));
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn test_terminal_states_absorb_ticks() {
        let state = PollState::default()
            .advance(Tick::Checked(Ok(true)), MS)
            .advance(Tick::DeadlineReached, MS * 9)
            .advance(Tick::Checked(Err(anyhow!("late"))), MS * 10);
        assert!(matches!(state, PollState::Satisfied { checks: 1, .. }));
    }

    #[test]
    fn test_timeout_error_names_condition() {
        let cond = PollCondition::new("secondary blob endpoint", MS, MS);
        let err = PollState::TimedOut {
            checks: 4,
            elapsed: MS,
        }
        .into_result(&cond)
        .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("secondary blob endpoint"));
    }

    #[test]
    fn test_wait_until_stops_on_predicate_error() {
        let mut calls = 0;
        let cond = PollCondition::new("crd installed", MS * 5, Duration::from_secs(5));
        let err = wait_until(&cond, || {
            calls += 1;
            Err(anyhow!("authorization failed"))
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, HarnessError::PredicateFailed { .. }));
    }

    #[test]
    fn test_zero_timeout_never_checks() {
        let mut calls = 0;
        let cond = PollCondition::new("never", MS * 10, Duration::ZERO);
        let err = wait_until(&cond, || {
            calls += 1;
            Ok(true)
        })
        .unwrap_err();
        assert_eq!(calls, 0);
        assert!(err.is_timeout());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let cond = PollCondition::new("busy", Duration::ZERO, Duration::from_secs(1));
        assert!(matches!(
            wait_until(&cond, || Ok(true)),
            Err(HarnessError::Config(_))
        ));
    }

    #[test]
    fn test_unbounded_timeout_waits_without_deadline() {
        let mut calls = 0;
        let cond = PollCondition::new("forever", MS * 2, Duration::MAX);
        let report = wait_until(&cond, || {
            calls += 1;
            Ok(calls == 3)
        })
        .unwrap();
        assert_eq!(report.checks, 3);
    }

    #[test]
    fn test_unrepresentable_interval_rejected() {
        let cond = PollCondition::new("glacial", Duration::MAX, Duration::from_secs(1));
        let err = wait_until(&cond, || Ok(true)).unwrap_err();
        assert!(matches!(err, HarnessError::Config(ref m) if m.contains("too large")));
    }

    #[test]
    fn test_wait_for_deletion_inverts_probe() {
        let mut remaining = 2;
        let cond = PollCondition::new("rg deleted", MS * 5, Duration::from_secs(2));
        let report = wait_for_deletion(&cond, || {
            remaining -= 1;
            Ok(remaining > 0)
        })
        .unwrap();
        assert_eq!(report.checks, 2);
    }
}
