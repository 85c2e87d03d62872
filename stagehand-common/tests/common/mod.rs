#![allow(dead_code)]

use std::path::{Path, PathBuf};

use stagehand_common::config::EnvSource;
use stagehand_common::{HarnessSettings, InvocationConfig, OptionsBuilder, RetrySettings};

#[ctor::ctor]
fn setup() {
    stagehand_common::testing::init_global_test_logging();
}

pub fn credential_env() -> EnvSource {
    EnvSource::from_pairs([
        ("ARM_SUBSCRIPTION_ID", "00000000-0000-0000-0000-000000000001"),
        ("ARM_TENANT_ID", "00000000-0000-0000-0000-000000000002"),
        ("ARM_CLIENT_ID", "00000000-0000-0000-0000-000000000003"),
        ("ARM_CLIENT_SECRET", "not-a-real-secret"),
    ])
}

pub fn settings() -> HarnessSettings {
    HarnessSettings::from_env(&credential_env()).expect("settings")
}

pub fn config_for(dir: &Path, retry: RetrySettings) -> InvocationConfig {
    OptionsBuilder::new(&settings(), dir)
        .retry(retry)
        .build()
        .expect("config")
}

/// Write an executable shell script standing in for the provisioning tool.
///
/// Every invocation appends its arguments to `calls.log` next to the script,
/// prints `$FAKE_TOOL_STDERR` to stderr and exits with `$FAKE_TOOL_EXIT`.
#[cfg(unix)]
pub fn fake_tool(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-terraform");
    let log = dir.join("calls.log");
    let script = format!(
        "#!/bin/sh\necho \"$*\" >> '{}'\nif [ -n \"$FAKE_TOOL_STDERR\" ]; then echo \"$FAKE_TOOL_STDERR\" >&2; fi\nexit ${{FAKE_TOOL_EXIT:-0}}\n",
        log.display()
    );
    std::fs::write(&path, script).expect("write fake tool");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

/// Lines recorded by [`fake_tool`].
pub fn fake_tool_calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}
