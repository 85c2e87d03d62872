//! Per-test working directories.
//!
//! Fixtures are copied into a fresh directory under the work root so that
//! concurrent tests never share tool state.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::options::name_suffix;

/// Entries never copied out of a fixture.
const SKIPPED_ENTRIES: &[&str] = &[
    ".terraform",
    ".terraform.lock.hcl",
    "terraform.tfstate",
    "terraform.tfstate.backup",
    ".terraform.tfstate.lock.info",
    "crash.log",
    super::state::STATE_DIR,
    crate::tool::VAR_FILE_NAME,
];

/// Leftovers from an interrupted run that break the next one.
const STALE_ARTIFACTS: &[&str] = &[".terraform.tfstate.lock.info", "crash.log"];

#[derive(Debug, Clone, Copy)]
pub struct Workdir;

impl Workdir {
    /// Copy `fixture_dir` into a unique directory under `work_root`.
    ///
    /// The directory name carries the test name, a UTC timestamp and a short
    /// random tag.
    pub fn copy_fixture_to_temp(
        work_root: &Path,
        fixture_dir: &Path,
        test_name: &str,
    ) -> HarnessResult<PathBuf> {
        if !fixture_dir.is_dir() {
            return Err(HarnessError::Config(format!(
                "fixture directory {} does not exist",
                fixture_dir.display()
            )));
        }

        let tag: String = name_suffix().chars().take(6).collect();
        let dir = work_root.join(format!(
            "{}-{}-{tag}",
            sanitize(test_name),
            Utc::now().format("%Y%m%dT%H%M%S")
        ));
        copy_tree(fixture_dir, &dir)?;
        info!(
            fixture = %fixture_dir.display(),
            workdir = %dir.display(),
            "Copied fixture to working directory"
        );
        Ok(dir)
    }

    /// Remove stale lock and crash files left by an interrupted run.
    /// Saved stage state and tool state are kept.
    pub fn prepare(dir: &Path) -> HarnessResult<()> {
        for name in STALE_ARTIFACTS {
            let path = dir.join(name);
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed stale artifact"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn remove(dir: &Path) -> HarnessResult<()> {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete working directories under `work_root` older than `max_age`.
    /// Returns how many were removed. A missing root counts as empty.
    pub fn cleanup_stale_workdirs(work_root: &Path, max_age: Duration) -> HarnessResult<usize> {
        let entries = match std::fs::read_dir(work_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_dir() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }
            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to remove stale workdir"),
            }
        }
        if removed > 0 {
            info!(removed, root = %work_root.display(), "Removed stale working directories");
        }
        Ok(removed)
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "run".to_string()
    } else {
        cleaned
    }
}

fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_str().is_some_and(|n| SKIPPED_ENTRIES.contains(&n)) {
            continue;
        }
        let target = dst.join(&name);
        // Follows symlinks: a linked shared module is copied as a directory.
        let metadata = std::fs::metadata(entry.path())?;
        if metadata.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
