//! # batchtrain-core — batch training over a directory of configs
//!
//! Finds the detection-framework config files under a directory, drops the
//! ones whose output directory already holds a checkpoint, and trains the
//! rest one after another through an external single-run training script.
//!
//! The pieces, in the order a batch uses them:
//! 1. [`registry`] scans the output root for runs that already finished
//! 2. [`discovery`] selects config files by glob pattern and subtracts those runs
//! 3. [`batch`] dispatches the remaining configs sequentially through a
//!    [`launcher::TrainingLauncher`]

pub mod batch;
pub mod config;
pub mod discovery;
pub mod error;
pub mod launcher;
pub mod options;
pub mod registry;

pub use batch::{BatchPlan, BatchReport, BatchTrainer, CompletedRun};
pub use config::{BatchConfig, LauncherConfig, load_config};
pub use discovery::{ConfigRef, PatternSet};
pub use error::BatchError;
pub use launcher::{ProcessLauncher, TrainJob, TrainingLauncher};
pub use options::{Launcher, TrainOptions};
pub use registry::TrainedRuns;
