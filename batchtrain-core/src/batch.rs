//! Batch trainer — plan the batch, then dispatch one run per config.
//!
//! Runs execute strictly one after another. The first failing run aborts the
//! batch and its error is returned as-is; configs after it are not attempted.

use crate::config::BatchConfig;
use crate::discovery::{self, ConfigRef, PatternSet};
use crate::error::BatchError;
use crate::launcher::{TrainJob, TrainingLauncher};
use crate::registry::TrainedRuns;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// What a batch will do: the runs found trained, the matching configs left out
/// because of them, and the configs still to train.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchPlan {
    pub trained: TrainedRuns,
    pub skipped: Vec<ConfigRef>,
    pub pending: Vec<ConfigRef>,
}

/// A run that finished successfully.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedRun {
    pub run_id: String,
    pub config: PathBuf,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

/// Outcome of a batch in which every run succeeded.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub completed: Vec<CompletedRun>,
    /// Matching configs left out because their run was already trained.
    pub skipped: usize,
}

/// Discovers the configs of a batch and trains them one by one.
pub struct BatchTrainer<L> {
    config: BatchConfig,
    config_dir: PathBuf,
    patterns: PatternSet,
    launcher: L,
}

impl<L: TrainingLauncher> BatchTrainer<L> {
    pub fn new(config: BatchConfig, launcher: L) -> Result<Self, BatchError> {
        config.validate()?;
        let config_dir = config
            .config_dir
            .clone()
            .ok_or_else(|| BatchError::config("config_dir is not set"))?;
        let patterns = PatternSet::parse(config.f_pat.as_deref())?;
        Ok(Self {
            config,
            config_dir,
            patterns,
            launcher,
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Work out which configs need training, without launching anything.
    pub fn plan(&self) -> Result<BatchPlan, BatchError> {
        // With overwrite nothing is excluded, so the output dir is not consulted.
        let trained = if self.config.overwrite {
            TrainedRuns::new()
        } else {
            TrainedRuns::scan(&self.config.model_dir, &self.config.checkpoint_suffix)?
        };

        let configs = discovery::find_configs(
            &self.config_dir,
            &self.patterns,
            &self.config.config_suffix,
        )?;
        let (pending, skipped) = discovery::split_trained(configs, &trained, self.config.overwrite);

        info!(count = pending.len(), "The following configs would be trained in this process");
        for config in &pending {
            info!(config = %config.path.display(), "Config file");
        }

        Ok(BatchPlan {
            trained,
            skipped,
            pending,
        })
    }

    /// Plan the batch and train every pending config.
    pub async fn run(&self) -> Result<BatchReport, BatchError> {
        let plan = self.plan()?;
        self.execute(&plan).await
    }

    /// Train the pending configs of `plan` in order, stopping at the first failure.
    pub async fn execute(&self, plan: &BatchPlan) -> Result<BatchReport, BatchError> {
        let total = plan.pending.len();
        let mut report = BatchReport {
            completed: Vec::with_capacity(total),
            skipped: plan.skipped.len(),
        };

        for (index, config) in plan.pending.iter().enumerate() {
            let job = TrainJob {
                config,
                options: &self.config.train,
            };
            info!(
                run_id = %config.run_id,
                config = %config.path.display(),
                "Starting run {}/{}",
                index + 1,
                total
            );

            let started_at = Utc::now();
            let clock = Instant::now();
            self.launcher.launch(&job).await?;
            let duration_secs = clock.elapsed().as_secs_f64();

            info!(run_id = %config.run_id, duration_secs, "Run finished");
            report.completed.push(CompletedRun {
                run_id: config.run_id.clone(),
                config: config.path.clone(),
                started_at,
                duration_secs,
            });
        }

        Ok(report)
    }
}
