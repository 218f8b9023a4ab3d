//! Trained-run registry — which runs already left a checkpoint behind.
//!
//! The output root holds one directory per run, named after the run's
//! config file. A run counts as trained when its directory directly contains
//! a file ending in the checkpoint suffix. The scan is a snapshot: runs that
//! finish (or get cleaned up) while it happens may be misreported.

use crate::error::BatchError;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

/// Set of run identifiers that already have a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TrainedRuns {
    runs: BTreeSet<String>,
}

impl TrainedRuns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `root` for run directories holding a checkpoint.
    ///
    /// A missing root means nothing has been trained yet.
    pub fn scan(root: &Path, checkpoint_suffix: &str) -> Result<Self, BatchError> {
        let mut trained = Self::new();
        if !root.exists() {
            debug!(model_dir = %root.display(), "Model dir does not exist, nothing trained yet");
            return Ok(trained);
        }

        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            let path = entry.path();
            // Follows symlinks, so linked run directories count too.
            if !path.is_dir() {
                continue;
            }
            if has_checkpoint(&path, checkpoint_suffix)? {
                trained
                    .runs
                    .insert(entry.file_name().to_string_lossy().to_string());
            }
        }

        info!(
            model_dir = %root.display(),
            count = trained.len(),
            "The following runs are already trained"
        );
        for run_id in &trained.runs {
            info!(run_id = %run_id, "Trained run");
        }

        Ok(trained)
    }

    pub fn contains(&self, run_id: &str) -> bool {
        self.runs.contains(run_id)
    }

    pub fn insert(&mut self, run_id: impl Into<String>) -> bool {
        self.runs.insert(run_id.into())
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.runs.iter().map(String::as_str)
    }
}

impl FromIterator<String> for TrainedRuns {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            runs: iter.into_iter().collect(),
        }
    }
}

/// Whether `dir` directly contains a file whose name ends in `suffix`.
pub fn has_checkpoint(dir: &Path, suffix: &str) -> Result<bool, BatchError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().ends_with(suffix) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let trained = TrainedRuns::scan(&dir.path().join("work_dirs"), ".pth").unwrap();
        assert!(trained.is_empty());
    }

    #[test]
    fn test_root_without_subdirs_is_empty() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("stray.pth"));
        touch(&dir.path().join("notes.txt"));
        let trained = TrainedRuns::scan(dir.path(), ".pth").unwrap();
        assert!(trained.is_empty());
    }

    #[test]
    fn test_checkpoint_marks_run_trained() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("exp1").join("epoch_12.pth"));
        touch(&dir.path().join("exp2").join("20240101_000000.log"));
        std::fs::create_dir_all(dir.path().join("exp3")).unwrap();

        let trained = TrainedRuns::scan(dir.path(), ".pth").unwrap();
        assert!(trained.contains("exp1"));
        assert!(!trained.contains("exp2"));
        assert!(!trained.contains("exp3"));
        assert_eq!(trained.len(), 1);
    }

    #[test]
    fn test_nested_checkpoint_does_not_count() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("exp1").join("sub").join("model.pth"));
        let trained = TrainedRuns::scan(dir.path(), ".pth").unwrap();
        assert!(!trained.contains("exp1"));
    }

    #[test]
    fn test_custom_suffix() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("exp1").join("model.ckpt"));
        touch(&dir.path().join("exp2").join("model.pth"));
        let trained = TrainedRuns::scan(dir.path(), ".ckpt").unwrap();
        assert_eq!(trained.iter().collect::<Vec<_>>(), vec!["exp1"]);
    }
}
