//! Launchers for the single-run training entry point.
//!
//! [`ProcessLauncher`] runs the training script as a child Python process,
//! one per config. Its stdout/stderr are inherited so the training
//! framework's own logging reaches the terminal unchanged.

use crate::config::LauncherConfig;
use crate::discovery::ConfigRef;
use crate::error::BatchError;
use crate::options::TrainOptions;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// One single-run training job: the active config plus the shared options.
#[derive(Debug, Clone, Copy)]
pub struct TrainJob<'a> {
    pub config: &'a ConfigRef,
    pub options: &'a TrainOptions,
}

impl TrainJob<'_> {
    pub fn run_id(&self) -> &str {
        &self.config.run_id
    }
}

/// Something that can carry out a single training run to completion.
#[async_trait]
pub trait TrainingLauncher: Send + Sync {
    /// Run the job. Returns once the run has finished.
    async fn launch(&self, job: &TrainJob<'_>) -> Result<(), BatchError>;
}

/// Runs `<python> <train_script> <config> <options...>` as a child process.
pub struct ProcessLauncher {
    python: PathBuf,
    train_script: PathBuf,
    workspace: PathBuf,
    timeout: Option<Duration>,
    env: BTreeMap<String, String>,
}

impl ProcessLauncher {
    pub fn new(python: PathBuf, train_script: PathBuf, workspace: PathBuf) -> Self {
        Self {
            python,
            train_script,
            workspace,
            timeout: None,
            env: BTreeMap::new(),
        }
    }

    /// Build a launcher from configuration, resolving the interpreter.
    pub fn from_config(config: &LauncherConfig, workspace: &Path) -> Self {
        let python = config
            .python
            .clone()
            .or_else(|| detect_venv(workspace).map(|venv| venv_python(&venv)))
            .unwrap_or_else(|| PathBuf::from("python3"));

        Self {
            python,
            train_script: config.train_script.clone(),
            workspace: workspace.to_path_buf(),
            timeout: config.timeout_secs.map(Duration::from_secs),
            env: config.env.clone(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn python(&self) -> &Path {
        &self.python
    }

    /// Arguments passed to the interpreter for `job`.
    pub fn args(&self, job: &TrainJob<'_>) -> Vec<String> {
        let mut args = vec![
            self.train_script.display().to_string(),
            job.config.path.display().to_string(),
        ];
        args.extend(job.options.to_args());
        args
    }

    /// The full command line, for display.
    pub fn command_line(&self, job: &TrainJob<'_>) -> String {
        std::iter::once(self.python.display().to_string())
            .chain(self.args(job))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl TrainingLauncher for ProcessLauncher {
    async fn launch(&self, job: &TrainJob<'_>) -> Result<(), BatchError> {
        let run_id = job.run_id();
        debug!(run_id = %run_id, command = %self.command_line(job), "Spawning training run");

        let mut child = Command::new(&self.python)
            .args(self.args(job))
            .current_dir(&self.workspace)
            .envs(&self.env)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BatchError::launch(
                    run_id,
                    format!("failed to spawn {}: {e}", self.python.display()),
                )
            })?;

        let status = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(BatchError::Timeout {
                        run_id: run_id.to_string(),
                        secs: timeout.as_secs(),
                    });
                }
            },
            None => child.wait().await?,
        };

        if !status.success() {
            return Err(BatchError::RunFailed {
                run_id: run_id.to_string(),
                status,
            });
        }
        Ok(())
    }
}

/// Detect a virtual environment: `VIRTUAL_ENV`, then common directory names
/// in the workspace.
fn detect_venv(workspace: &Path) -> Option<PathBuf> {
    if let Ok(venv) = std::env::var("VIRTUAL_ENV") {
        let path = PathBuf::from(venv);
        if path.exists() {
            return Some(path);
        }
    }

    for name in &[".venv", "venv"] {
        let path = workspace.join(name);
        if venv_python(&path).exists() {
            return Some(path);
        }
    }

    None
}

fn venv_python(venv: &Path) -> PathBuf {
    let bin_dir = if cfg!(windows) { "Scripts" } else { "bin" };
    venv.join(bin_dir).join("python")
}
