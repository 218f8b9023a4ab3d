//! Configuration system for batchtrain.
//!
//! Uses `figment` for layered configuration: defaults -> config files ->
//! environment. CLI flags are applied on top by the binary.
//! Configuration is loaded from `~/.config/batchtrain/config.toml` and/or
//! `.batchtrain/config.toml` in the workspace directory.

use crate::discovery::PatternSet;
use crate::error::BatchError;
use crate::options::TrainOptions;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Suffix of the configuration files a batch is made of.
pub const DEFAULT_CONFIG_SUFFIX: &str = ".py";
/// Suffix of the file a finished run leaves in its output directory.
pub const DEFAULT_CHECKPOINT_SUFFIX: &str = ".pth";

/// Top-level configuration for a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Root searched recursively for configuration files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_dir: Option<PathBuf>,
    /// Comma-separated glob patterns; all configuration files when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub f_pat: Option<String>,
    /// Retrain runs that already have a checkpoint.
    #[serde(default)]
    pub overwrite: bool,
    /// Output root holding one directory per run.
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
    #[serde(default = "default_config_suffix")]
    pub config_suffix: String,
    #[serde(default = "default_checkpoint_suffix")]
    pub checkpoint_suffix: String,
    #[serde(default)]
    pub launcher: LauncherConfig,
    /// Options forwarded to every run.
    #[serde(default)]
    pub train: TrainOptions,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            config_dir: None,
            f_pat: None,
            overwrite: false,
            model_dir: default_model_dir(),
            config_suffix: default_config_suffix(),
            checkpoint_suffix: default_checkpoint_suffix(),
            launcher: LauncherConfig::default(),
            train: TrainOptions::default(),
        }
    }
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("work_dirs")
}

fn default_config_suffix() -> String {
    DEFAULT_CONFIG_SUFFIX.to_string()
}

fn default_checkpoint_suffix() -> String {
    DEFAULT_CHECKPOINT_SUFFIX.to_string()
}

/// How the single-run training script is started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Python interpreter (auto-detected from the active venv if not set).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python: Option<PathBuf>,
    /// Single-run training entry point.
    #[serde(default = "default_train_script")]
    pub train_script: PathBuf,
    /// Per-run timeout in seconds. Runs are unbounded when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Extra environment variables for every run.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            python: None,
            train_script: default_train_script(),
            timeout_secs: None,
            env: BTreeMap::new(),
        }
    }
}

fn default_train_script() -> PathBuf {
    PathBuf::from("tools").join("train.py")
}

impl BatchConfig {
    /// Reject settings that would make discovery meaningless.
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.config_suffix.is_empty() {
            return Err(BatchError::config("config_suffix must not be empty"));
        }
        if self.checkpoint_suffix.is_empty() {
            return Err(BatchError::config("checkpoint_suffix must not be empty"));
        }
        if self.launcher.timeout_secs == Some(0) {
            return Err(BatchError::config("launcher.timeout_secs must be positive"));
        }
        PatternSet::parse(self.f_pat.as_deref())?;
        self.train.validate()
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `BATCHTRAIN_`)
/// 2. Explicit config file (`--config`)
/// 3. Workspace-local config (`.batchtrain/config.toml`)
/// 4. User config (`~/.config/batchtrain/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<BatchConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(BatchConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // An explicit file that does not exist is an error, unlike the implicit ones.
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Box::new(figment::Error::from(format!(
                "config file not found: {}",
                path.display()
            ))));
        }
        figment = figment.merge(Toml::file(path));
    }

    // BATCHTRAIN_MODEL_DIR, BATCHTRAIN_LAUNCHER__PYTHON, BATCHTRAIN_TRAIN__SEED, ...
    // Env keys come through lowercased, so `launcher.env` is only read from files.
    figment = figment.merge(
        Env::prefixed("BATCHTRAIN_")
            .split("__")
            .filter(|key| !is_launcher_env_key(key.as_str())),
    );

    figment.extract().map_err(Box::new)
}

/// Whether an environment key (prefix stripped) targets the `launcher.env` map.
fn is_launcher_env_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase().replace("__", ".");
    key == "launcher.env" || key.starts_with("launcher.env.")
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "batchtrain", "batchtrain")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".batchtrain").join("config.toml")
}
