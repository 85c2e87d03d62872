//! Structured logging for test runs.
//!
//! ```ignore
//! use stagehand_common::testing::init_global_test_logging;
//!
//! #[ctor::ctor]
//! fn setup() {
//!     init_global_test_logging();
//! }
//! ```

use std::path::PathBuf;
use std::sync::{Mutex, Once};

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

use crate::config::EnvSource;

static GLOBAL_LOGGING_INIT: Once = Once::new();

/// Install a JSONL + test-writer subscriber once per process.
///
/// Events go to `target/test-logs/all_tests.jsonl` (override with
/// `STAGEHAND_TEST_LOG_FILE`) and to the captured test output. The level
/// comes from `STAGEHAND_TEST_LOG_LEVEL`, default `info`.
pub fn init_global_test_logging() {
    GLOBAL_LOGGING_INIT.call_once(|| {
        let env = EnvSource::process();
        let log_file = create_global_log_file(&env);

        let file_layer = log_file.map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
        });

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .with_level(true)
            .compact();

        let level = env.non_empty("STAGEHAND_TEST_LOG_LEVEL").unwrap_or("info");
        let filter = tracing_subscriber::EnvFilter::try_new(format!(
            "stagehand={level},stagehand_common={level}"
        ))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(stderr_layer);

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn create_global_log_file(env: &EnvSource) -> Option<std::fs::File> {
    if let Some(custom_path) = env.non_empty("STAGEHAND_TEST_LOG_FILE") {
        if let Some(parent) = PathBuf::from(custom_path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        return std::fs::File::create(custom_path).ok();
    }

    let log_dir = find_target_dir(env).join("test-logs");
    let _ = std::fs::create_dir_all(&log_dir);
    std::fs::File::create(log_dir.join("all_tests.jsonl")).ok()
}

/// Find the target directory by searching up from the current dir.
fn find_target_dir(env: &EnvSource) -> PathBuf {
    if let Some(target_dir) = env.non_empty("CARGO_TARGET_DIR") {
        return PathBuf::from(target_dir);
    }

    let mut cwd = std::env::current_dir().unwrap_or_default();
    loop {
        let target = cwd.join("target");
        if target.is_dir() {
            return target;
        }
        if !cwd.pop() {
            return PathBuf::from("target");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_global_test_logging();
        init_global_test_logging();
        tracing::info!(check = "twice", "logging initialized");
    }

    #[test]
    fn test_target_dir_override() {
        let env = EnvSource::from_pairs([("CARGO_TARGET_DIR", "/tmp/stagehand-target")]);
        assert_eq!(find_target_dir(&env), PathBuf::from("/tmp/stagehand-target"));
    }
}
