//! CLI command handlers.

use crate::{Commands, ConfigAction};
use anyhow::Context;
use batchtrain_core::{BatchConfig, BatchPlan, BatchReport, BatchTrainer, ProcessLauncher, TrainJob};
use std::path::Path;
use tracing::debug;

/// Handle a CLI subcommand. `overrides` applies the command-line flags to a
/// loaded configuration.
pub fn handle_command(
    command: &Commands,
    workspace: &Path,
    explicit_config: Option<&Path>,
    overrides: impl Fn(&mut BatchConfig),
) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => {
            handle_config(action, workspace, explicit_config, overrides)
        }
    }
}

fn handle_config(
    action: &ConfigAction,
    workspace: &Path,
    explicit_config: Option<&Path>,
    overrides: impl Fn(&mut BatchConfig),
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".batchtrain");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&BatchConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            println!("{}", merged_config_toml(workspace, explicit_config, overrides)?);
            Ok(())
        }
    }
}

/// Files, environment and command-line flags merged, rendered as TOML.
fn merged_config_toml(
    workspace: &Path,
    explicit_config: Option<&Path>,
    overrides: impl Fn(&mut BatchConfig),
) -> anyhow::Result<String> {
    let mut config = batchtrain_core::load_config(Some(workspace), explicit_config)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    overrides(&mut config);
    Ok(toml::to_string_pretty(&config)?)
}

/// Plan the batch and, unless `dry_run`, train every pending config.
///
/// Returns an error as soon as one run fails; later configs are not tried.
pub async fn run_batch(
    mut config: BatchConfig,
    workspace: &Path,
    dry_run: bool,
    json: bool,
) -> anyhow::Result<()> {
    // Relative paths are taken from the workspace, which is also where runs start.
    config.config_dir = config.config_dir.map(|dir| workspace.join(dir));
    config.model_dir = workspace.join(&config.model_dir);
    debug!(
        workspace = %workspace.display(),
        config_dir = ?config.config_dir,
        model_dir = %config.model_dir.display(),
        "Resolved batch paths"
    );

    let launcher = ProcessLauncher::from_config(&config.launcher, workspace);
    let trainer =
        BatchTrainer::new(config, launcher).context("Invalid batch configuration")?;

    if dry_run {
        let plan = trainer.plan()?;
        print_plan(&trainer, &plan, json)?;
        return Ok(());
    }

    let report = trainer.run().await.context("Batch training aborted")?;
    print_report(&report, json)?;
    Ok(())
}

fn print_plan(
    trainer: &BatchTrainer<ProcessLauncher>,
    plan: &BatchPlan,
    json: bool,
) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(plan)?);
        return Ok(());
    }

    println!("Already trained ({}):", plan.skipped.len());
    for config in &plan.skipped {
        println!("  {}", config.run_id);
    }
    println!("To train ({}):", plan.pending.len());
    for config in &plan.pending {
        let job = TrainJob {
            config,
            options: &trainer.config().train,
        };
        println!("  {}", trainer.launcher().command_line(&job));
    }
    Ok(())
}

fn print_report(report: &BatchReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "Trained {} config(s), skipped {} already trained.",
        report.completed.len(),
        report.skipped
    );
    for run in &report.completed {
        println!("  {} ({:.0}s)", run.run_id, run.duration_secs);
    }
    Ok(())
}
