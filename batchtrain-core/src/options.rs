//! Shared training options forwarded to every single-run invocation.
//!
//! None of these are interpreted here. They are rendered back into the
//! flag syntax of the single-run training script by [`TrainOptions::to_args`].

use crate::error::BatchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Job launcher understood by the training script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Launcher {
    #[default]
    None,
    Pytorch,
    Slurm,
    Mpi,
}

impl fmt::Display for Launcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Launcher::None => write!(f, "none"),
            Launcher::Pytorch => write!(f, "pytorch"),
            Launcher::Slurm => write!(f, "slurm"),
            Launcher::Mpi => write!(f, "mpi"),
        }
    }
}

impl FromStr for Launcher {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Launcher::None),
            "pytorch" => Ok(Launcher::Pytorch),
            "slurm" => Ok(Launcher::Slurm),
            "mpi" => Ok(Launcher::Mpi),
            other => Err(BatchError::config(format!(
                "unknown launcher '{other}' (expected none, pytorch, slurm or mpi)"
            ))),
        }
    }
}

/// Pass-through options shared by all runs in a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    /// Directory the training script saves logs and models to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
    /// Checkpoint file to resume from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_from: Option<PathBuf>,
    /// Skip evaluation of checkpoints during training.
    pub no_validate: bool,
    /// Number of GPUs (non-distributed training only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpus: Option<u32>,
    /// Explicit GPU ids (non-distributed training only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gpu_ids: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Deterministic CUDNN backend.
    pub deterministic: bool,
    /// Deprecated `key=value` overrides, kept for older training scripts.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// `key=value` overrides merged into each config file.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cfg_options: Vec<String>,
    pub launcher: Launcher,
    pub local_rank: u32,
}

impl TrainOptions {
    /// Check the option combinations the training script would reject.
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.gpus.is_some() && !self.gpu_ids.is_empty() {
            return Err(BatchError::config(
                "--gpus and --gpu-ids are mutually exclusive",
            ));
        }
        for pair in self.options.iter().chain(&self.cfg_options) {
            parse_key_value(pair)?;
        }
        Ok(())
    }

    /// Render the options as command-line arguments, in a stable order.
    ///
    /// Flags at their default value are omitted.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(dir) = &self.work_dir {
            args.push("--work-dir".to_string());
            args.push(dir.display().to_string());
        }
        if let Some(ckpt) = &self.resume_from {
            args.push("--resume-from".to_string());
            args.push(ckpt.display().to_string());
        }
        if self.no_validate {
            args.push("--no-validate".to_string());
        }
        if let Some(gpus) = self.gpus {
            args.push("--gpus".to_string());
            args.push(gpus.to_string());
        } else if !self.gpu_ids.is_empty() {
            args.push("--gpu-ids".to_string());
            args.extend(self.gpu_ids.iter().map(u32::to_string));
        }
        if let Some(seed) = self.seed {
            args.push("--seed".to_string());
            args.push(seed.to_string());
        }
        if self.deterministic {
            args.push("--deterministic".to_string());
        }
        if !self.options.is_empty() {
            args.push("--options".to_string());
            args.extend(self.options.iter().cloned());
        }
        if !self.cfg_options.is_empty() {
            args.push("--cfg-options".to_string());
            args.extend(self.cfg_options.iter().cloned());
        }
        if self.launcher != Launcher::None {
            args.push("--launcher".to_string());
            args.push(self.launcher.to_string());
        }
        if self.local_rank != 0 {
            args.push("--local_rank".to_string());
            args.push(self.local_rank.to_string());
        }

        args
    }
}

/// Split a `key=value` override on its first `=`.
///
/// The value is kept verbatim (lists, tuples and quoted strings are the
/// training script's business).
pub fn parse_key_value(pair: &str) -> Result<(&str, &str), BatchError> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key, value)),
        _ => Err(BatchError::InvalidOption(pair.to_string())),
    }
}
