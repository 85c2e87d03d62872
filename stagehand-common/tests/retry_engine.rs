//! Retry budget and classification against a real subprocess.

#![cfg(unix)]

mod common;

use std::time::Duration;

use stagehand_common::retry::RetryPattern;
use stagehand_common::{HarnessError, Provisioner, RetrySettings};

fn retry(max_retries: u32) -> RetrySettings {
    RetrySettings::no_retry()
        .with_patterns([RetryPattern::new(
            ".*TooManyRequests.*",
            "Too many requests - retrying",
        )])
        .with_max_retries(max_retries)
        .with_delay(Duration::from_millis(10))
}

fn provisioner(
    dir: &std::path::Path,
    max_retries: u32,
    stderr: &str,
    exit: i32,
) -> Provisioner {
    let tool = common::fake_tool(dir);
    let mut config = common::config_for(dir, retry(max_retries));
    config.tool = tool.to_string_lossy().to_string();
    config
        .env
        .insert("FAKE_TOOL_STDERR".to_string(), stderr.to_string());
    config
        .env
        .insert("FAKE_TOOL_EXIT".to_string(), exit.to_string());
    Provisioner::new(config).expect("provisioner")
}

#[test]
fn retryable_failure_runs_exactly_n_plus_one_times() {
    for n in [0, 2, 3] {
        let dir = tempfile::tempdir().unwrap();
        let message = "Error: StatusCode=429 Code=\"TooManyRequests\" retry later";
        let p = provisioner(dir.path(), n, message, 1);

        let err = p.apply().unwrap_err();

        let calls = common::fake_tool_calls(dir.path());
        assert_eq!(calls.len() as u32, n + 1, "max_retries = {n}");
        assert!(calls.iter().all(|c| c.starts_with("apply -input=false -auto-approve")));
        match &err {
            HarnessError::RetriesExhausted { attempts, .. } => assert_eq!(*attempts, n + 1),
            other => panic!("expected RetriesExhausted, got {other}"),
        }
        assert!(err.to_string().contains(message));
        assert_eq!(err.tool_output().map(str::trim), Some(message));
    }
}

#[test]
fn unmatched_failure_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let p = provisioner(dir.path(), 5, "Error: InvalidResourceLocation", 1);

    let err = p.apply().unwrap_err();

    assert_eq!(common::fake_tool_calls(dir.path()).len(), 1);
    assert!(matches!(err, HarnessError::Provisioning { exit_code: 1, .. }));
    assert!(err.to_string().contains("InvalidResourceLocation"));
}

#[test]
fn success_runs_once_and_writes_vars() {
    let dir = tempfile::tempdir().unwrap();
    let p = provisioner(dir.path(), 3, "", 0);

    let outcome = p.init_and_apply().unwrap();

    assert_eq!(outcome.attempts, 1);
    let calls = common::fake_tool_calls(dir.path());
    assert_eq!(calls.len(), 2);
    assert!(calls[0].starts_with("init -input=false -upgrade"));
    assert!(dir.path().join("stagehand.tfvars.json").is_file());
}
