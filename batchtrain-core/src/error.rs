//! Error types for the batchtrain-core crate.

use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Top-level error type for batch training operations.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid file pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("Config directory not found: {}", .0.display())]
    ConfigDirNotFound(PathBuf),

    #[error("Invalid option '{0}': expected key=value")]
    InvalidOption(String),

    #[error("Failed to launch training for {run_id}: {message}")]
    Launch { run_id: String, message: String },

    #[error("Training run {run_id} failed ({status})")]
    RunFailed { run_id: String, status: ExitStatus },

    #[error("Training run {run_id} timed out after {secs}s")]
    Timeout { run_id: String, secs: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BatchError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn launch(run_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Launch {
            run_id: run_id.into(),
            message: msg.into(),
        }
    }

    /// Name of the run this error belongs to, if it came from a single run.
    pub fn run_id(&self) -> Option<&str> {
        match self {
            Self::Launch { run_id, .. }
            | Self::RunFailed { run_id, .. }
            | Self::Timeout { run_id, .. } => Some(run_id),
            _ => None,
        }
    }
}
