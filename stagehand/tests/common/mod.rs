#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use stagehand_common::{EnvSource, HarnessSettings};

#[ctor::ctor]
fn setup() {
    stagehand_common::testing::init_global_test_logging();
}

pub fn credential_env(work_root: &Path) -> EnvSource {
    EnvSource::from_pairs([
        ("ARM_SUBSCRIPTION_ID", "00000000-0000-0000-0000-000000000001"),
        ("ARM_TENANT_ID", "00000000-0000-0000-0000-000000000002"),
        ("ARM_CLIENT_ID", "00000000-0000-0000-0000-000000000003"),
        ("ARM_CLIENT_SECRET", "not-a-real-secret"),
        ("STAGEHAND_RETRY_DELAY", "10ms"),
    ])
    .with("STAGEHAND_WORK_ROOT", work_root.to_string_lossy().into_owned())
}

pub fn settings(work_root: &Path) -> HarnessSettings {
    HarnessSettings::from_env(&credential_env(work_root)).expect("settings")
}

pub fn perf_settings(work_root: &Path) -> Arc<HarnessSettings> {
    let env = credential_env(work_root).with("RUN_PERFORMANCE_TESTS", "true");
    Arc::new(HarnessSettings::from_env(&env).expect("settings"))
}

/// A minimal fixture directory.
pub fn fixture() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("fixture dir");
    std::fs::write(
        dir.path().join("main.tf"),
        "variable \"random_suffix\" {}\nvariable \"location\" {}\n",
    )
    .expect("write fixture");
    dir
}

/// `output -json` payload with one string output.
pub fn outputs_json(name: &str, value: &str) -> String {
    format!(r#"{{"{name}":{{"sensitive":false,"type":"string","value":"{value}"}}}}"#)
}
