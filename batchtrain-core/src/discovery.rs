//! Configuration discovery — which config files make up a batch.

use crate::error::BatchError;
use crate::registry::TrainedRuns;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Pattern used when none is given.
pub const MATCH_ALL: &str = "*";

/// A config file selected for training, keyed by its run identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ConfigRef {
    pub path: PathBuf,
    /// Base name without the config suffix; also the run's output directory name.
    pub run_id: String,
}

impl ConfigRef {
    /// Build a reference if `path` ends in `suffix` and leaves a non-empty name.
    pub fn from_path(path: &Path, suffix: &str) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let run_id = name.strip_suffix(suffix)?;
        if run_id.is_empty() {
            return None;
        }
        Some(Self {
            path: path.to_path_buf(),
            run_id: run_id.to_string(),
        })
    }
}

/// Ordered list of glob patterns selecting candidate config files.
///
/// Patterns without a `/` match the file name. Patterns with one match the
/// trailing components of the path relative to the search root, at any depth:
/// `retinanet/*.py` selects both `retinanet/r50.py` and `lt/retinanet/r50.py`.
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<String>,
    by_name: GlobSet,
    by_path: GlobSet,
}

impl PatternSet {
    /// Parse a comma-separated pattern string. `None`, or a string with no
    /// non-blank entries, selects every file.
    pub fn parse(list: Option<&str>) -> Result<Self, BatchError> {
        let mut patterns: Vec<String> = list
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if patterns.is_empty() {
            patterns.push(MATCH_ALL.to_string());
        }

        let mut by_name = GlobSetBuilder::new();
        let mut by_path = GlobSetBuilder::new();
        for pattern in &patterns {
            let anchored;
            let glob_src = if pattern.contains('/') && !pattern.starts_with("**/") {
                anchored = format!("**/{pattern}");
                anchored.as_str()
            } else {
                pattern.as_str()
            };
            let glob = GlobBuilder::new(glob_src)
                .literal_separator(true)
                .build()
                .map_err(|source| BatchError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
            if pattern.contains('/') {
                by_path.add(glob);
            } else {
                by_name.add(glob);
            }
        }

        let build = |builder: GlobSetBuilder, pattern: &str| {
            builder.build().map_err(|source| BatchError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
        };
        let joined = patterns.join(",");
        Ok(Self {
            by_name: build(by_name, &joined)?,
            by_path: build(by_path, &joined)?,
            patterns,
        })
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether a file, given by its path relative to the search root, matches
    /// any pattern.
    pub fn is_match(&self, relative: &Path) -> bool {
        let name_match = relative
            .file_name()
            .is_some_and(|name| self.by_name.is_match(name));
        name_match || self.by_path.is_match(relative)
    }
}

/// Recursively find every file under `root` matching `patterns` and ending in
/// `suffix`, deduplicated and in path order.
pub fn find_configs(
    root: &Path,
    patterns: &PatternSet,
    suffix: &str,
) -> Result<Vec<ConfigRef>, BatchError> {
    if !root.is_dir() {
        return Err(BatchError::ConfigDirNotFound(root.to_path_buf()));
    }

    let mut found = BTreeSet::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if !patterns.is_match(relative) {
            continue;
        }
        if let Some(config) = ConfigRef::from_path(entry.path(), suffix) {
            found.insert(config);
        }
    }

    debug!(
        config_dir = %root.display(),
        patterns = ?patterns.patterns(),
        count = found.len(),
        "Found config files"
    );
    Ok(found.into_iter().collect())
}

/// Find the configs under `root` that still need training.
///
/// Configs whose run identifier is in `trained` are dropped unless
/// `overwrite` is set.
pub fn discover(
    root: &Path,
    patterns: &PatternSet,
    suffix: &str,
    trained: &TrainedRuns,
    overwrite: bool,
) -> Result<Vec<ConfigRef>, BatchError> {
    let configs = find_configs(root, patterns, suffix)?;
    Ok(split_trained(configs, trained, overwrite).0)
}

/// Split `configs` into those still to train and those left out because their
/// run is already in `trained`. With `overwrite` nothing is left out.
pub fn split_trained(
    configs: Vec<ConfigRef>,
    trained: &TrainedRuns,
    overwrite: bool,
) -> (Vec<ConfigRef>, Vec<ConfigRef>) {
    if overwrite {
        return (configs, Vec::new());
    }

    configs.into_iter().partition(|config| {
        let done = trained.contains(&config.run_id);
        if done {
            info!(run_id = %config.run_id, config = %config.path.display(), "Skipping trained run");
        }
        !done
    })
}
