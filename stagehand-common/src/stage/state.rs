//! Persisted stage state.
//!
//! Each key is one JSON file under `<workdir>/.stagehand/`. Writes go to a
//! temporary sibling first and are renamed into place, so a reader never
//! observes a half-written config.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::error::{HarnessError, HarnessResult};
use crate::options::InvocationConfig;

/// Directory inside the working directory that holds saved state.
pub const STATE_DIR: &str = ".stagehand";

/// Key under which the deploy stage saves its configuration by convention.
pub const CONFIG_KEY: &str = "invocation";

#[derive(Debug, Clone, Copy)]
pub struct StageState;

impl StageState {
    pub fn dir(workdir: &Path) -> PathBuf {
        workdir.join(STATE_DIR)
    }

    /// File for `key`. Keys are plain names; separators are rejected.
    pub fn path(workdir: &Path, key: &str) -> HarnessResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(HarnessError::Config(format!("invalid stage state key '{key}'")));
        }
        Ok(Self::dir(workdir).join(format!("{key}.json")))
    }

    pub fn save_config(workdir: &Path, key: &str, config: &InvocationConfig) -> HarnessResult<()> {
        Self::save(workdir, key, config)
    }

    /// Reload a saved config exactly as written. Credentials are not
    /// persisted; re-attach them with [`InvocationConfig::with_env`].
    pub fn load_config(workdir: &Path, key: &str) -> HarnessResult<InvocationConfig> {
        Self::load(workdir, key)
    }

    pub fn save_string(workdir: &Path, key: &str, value: &str) -> HarnessResult<()> {
        Self::save(workdir, key, &value)
    }

    pub fn load_string(workdir: &Path, key: &str) -> HarnessResult<String> {
        Self::load(workdir, key)
    }

    pub fn exists(workdir: &Path, key: &str) -> bool {
        Self::path(workdir, key).is_ok_and(|p| p.is_file())
    }

    /// Remove all saved state for `workdir`. Missing state is not an error.
    pub fn clear(workdir: &Path) -> HarnessResult<()> {
        let dir = Self::dir(workdir);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HarnessError::persistence(dir, e)),
        }
    }

    fn save<T: Serialize + ?Sized>(workdir: &Path, key: &str, value: &T) -> HarnessResult<()> {
        let path = Self::path(workdir, key)?;
        let body = serde_json::to_vec_pretty(value).map_err(|e| {
            HarnessError::persistence(&path, io::Error::new(io::ErrorKind::InvalidData, e))
        })?;
        write_atomic(&path, &body).map_err(|e| HarnessError::persistence(&path, e))?;
        debug!(path = %path.display(), key, "Saved stage state");
        Ok(())
    }

    fn load<T: DeserializeOwned>(workdir: &Path, key: &str) -> HarnessResult<T> {
        let path = Self::path(workdir, key)?;
        let body = std::fs::read(&path).map_err(|e| HarnessError::persistence(&path, e))?;
        let value = serde_json::from_slice(&body).map_err(|e| {
            HarnessError::persistence(&path, io::Error::new(io::ErrorKind::InvalidData, e))
        })?;
        debug!(path = %path.display(), key, "Loaded stage state");
        Ok(value)
    }
}

fn write_atomic(path: &Path, body: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "state path has no parent"))?;
    std::fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(".tmp-{}", Uuid::new_v4().simple()));
    if let Err(e) = std::fs::write(&tmp, body).and_then(|()| std::fs::rename(&tmp, path)) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetrySettings;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn sample(dir: &Path) -> InvocationConfig {
        InvocationConfig {
            working_dir: dir.to_path_buf(),
            vars: BTreeMap::from([
                ("name_suffix".to_string(), json!("abc123")),
                ("location".to_string(), json!("northeurope")),
            ]),
            retry: RetrySettings::azure_defaults(),
            tool: "terraform".into(),
            no_color: true,
            upgrade: true,
            suffix_var: "name_suffix".into(),
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn test_unserializable_value_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let value = BTreeMap::from([((1u8, 2u8), "tuple keys have no JSON form")]);
        let err = StageState::save(dir.path(), "bad", &value).unwrap_err();
        assert!(matches!(err, HarnessError::Persistence { ref path, .. } if path.ends_with("bad.json")));
        assert!(!StageState::exists(dir.path(), "bad"));
    }

    #[test]
    fn test_config_round_trip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = sample(dir.path());
        StageState::save_config(dir.path(), CONFIG_KEY, &cfg).unwrap();
        let back = StageState::load_config(dir.path(), CONFIG_KEY).unwrap();
        assert_eq!(back, cfg);
        assert_eq!(
            serde_json::to_vec(&back.vars).unwrap(),
            serde_json::to_vec(&cfg.vars).unwrap()
        );
        assert_eq!(back.suffix(), Some("abc123"));
    }

    #[test]
    fn test_overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        StageState::save_string(dir.path(), "rg", "rg-one").unwrap();
        StageState::save_string(dir.path(), "rg", "rg-two").unwrap();
        assert_eq!(StageState::load_string(dir.path(), "rg").unwrap(), "rg-two");
        let entries: Vec<_> = std::fs::read_dir(StageState::dir(dir.path()))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec!["rg.json"]);
    }

    #[test]
    fn test_missing_state_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!StageState::exists(dir.path(), CONFIG_KEY));
        let err = StageState::load_config(dir.path(), CONFIG_KEY).unwrap_err();
        assert!(matches!(err, HarnessError::Persistence { .. }));
    }

    #[test]
    fn test_corrupt_state_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = StageState::path(dir.path(), CONFIG_KEY).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            StageState::load_config(dir.path(), CONFIG_KEY),
            Err(HarnessError::Persistence { .. })
        ));
    }

    #[test]
    fn test_bad_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for key in ["", "../escape", "a/b", ".hidden"] {
            assert!(StageState::path(dir.path(), key).is_err(), "{key}");
        }
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        StageState::save_string(dir.path(), "k", "v").unwrap();
        assert!(StageState::exists(dir.path(), "k"));
        StageState::clear(dir.path()).unwrap();
        StageState::clear(dir.path()).unwrap();
        assert!(!StageState::exists(dir.path(), "k"));
    }
}
