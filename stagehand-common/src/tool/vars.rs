//! Input variables serialized for the tool.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::HarnessResult;

/// File the variables are written to inside the working directory.
pub const VAR_FILE_NAME: &str = "stagehand.tfvars.json";

/// JSON variable file. Scalars, lists and nested maps are written as-is.
#[derive(Debug, Clone, Copy)]
pub struct VarFile;

impl VarFile {
    pub fn path(working_dir: &Path) -> PathBuf {
        working_dir.join(VAR_FILE_NAME)
    }

    /// Write `vars` and return the file path.
    pub fn write(working_dir: &Path, vars: &BTreeMap<String, Value>) -> HarnessResult<PathBuf> {
        let path = Self::path(working_dir);
        let body = serde_json::to_vec_pretty(vars)?;
        std::fs::write(&path, body)?;
        Ok(path)
    }

    pub fn read(working_dir: &Path) -> HarnessResult<BTreeMap<String, Value>> {
        let body = std::fs::read(Self::path(working_dir))?;
        Ok(serde_json::from_slice(&body)?)
    }
}
