//! batchtrain CLI — train every config in a directory, one run at a time.
//!
//! Flags other than discovery and tool settings are handed unchanged to the
//! single-run training script for every config.

mod commands;

use batchtrain_core::{BatchConfig, BatchError, Launcher};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Batch-train detection configs, skipping runs that already have a checkpoint
#[derive(Parser, Debug)]
#[command(name = "batchtrain", version, about, long_about = None)]
struct Cli {
    /// Directory searched recursively for config files
    #[arg(long = "config_dir")]
    config_dir: Option<PathBuf>,

    /// Comma-separated file patterns; all config files when omitted
    #[arg(long = "f_pat")]
    f_pat: Option<String>,

    /// Train again even if a run already has a checkpoint
    #[arg(long)]
    overwrite: bool,

    /// Directory holding one output directory per run [default: work_dirs]
    #[arg(long = "model-dir")]
    model_dir: Option<PathBuf>,

    /// Directory to save logs and models (forwarded)
    #[arg(long = "work-dir")]
    work_dir: Option<PathBuf>,

    /// Checkpoint file to resume from (forwarded)
    #[arg(long = "resume-from")]
    resume_from: Option<PathBuf>,

    /// Do not evaluate checkpoints during training (forwarded)
    #[arg(long = "no-validate")]
    no_validate: bool,

    /// Number of GPUs, non-distributed training only (forwarded)
    #[arg(long, conflicts_with = "gpu_ids")]
    gpus: Option<u32>,

    /// Ids of GPUs, non-distributed training only (forwarded)
    #[arg(long = "gpu-ids", num_args = 1..)]
    gpu_ids: Vec<u32>,

    /// Random seed (forwarded)
    #[arg(long)]
    seed: Option<u64>,

    /// Deterministic CUDNN backend (forwarded)
    #[arg(long)]
    deterministic: bool,

    /// key=value config overrides, deprecated form of --cfg-options (forwarded)
    #[arg(long, num_args = 1.., value_parser = parse_override)]
    options: Vec<String>,

    /// key=value config overrides (forwarded)
    #[arg(long = "cfg-options", num_args = 1.., value_parser = parse_override)]
    cfg_options: Vec<String>,

    /// Job launcher: none, pytorch, slurm, mpi (forwarded)
    #[arg(long, value_parser = parse_launcher)]
    launcher: Option<Launcher>,

    /// Local rank set by the distributed launcher (forwarded)
    #[arg(long = "local_rank")]
    local_rank: Option<u32>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Workspace directory; relative paths resolve against it
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Python interpreter running the training script
    #[arg(long)]
    python: Option<PathBuf>,

    /// Single-run training script [default: tools/train.py]
    #[arg(long = "train-script")]
    train_script: Option<PathBuf>,

    /// Per-run timeout in seconds
    #[arg(long = "timeout")]
    timeout_secs: Option<u64>,

    /// Show what would be trained without launching anything
    #[arg(long)]
    dry_run: bool,

    /// Print the plan or report as JSON
    #[arg(long)]
    json: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default configuration file
    Init,
    /// Show the merged configuration (files, environment and flags)
    Show,
}

fn parse_override(s: &str) -> Result<String, String> {
    batchtrain_core::options::parse_key_value(s)
        .map(|_| s.to_string())
        .map_err(|e| e.to_string())
}

fn parse_launcher(s: &str) -> Result<Launcher, String> {
    s.parse().map_err(|e: BatchError| e.to_string())
}

impl Cli {
    /// Apply command-line flags on top of the loaded configuration.
    ///
    /// Switches only ever turn a setting on; an absent flag leaves the
    /// configured value alone.
    fn apply_overrides(&self, config: &mut BatchConfig) {
        if let Some(dir) = &self.config_dir {
            config.config_dir = Some(dir.clone());
        }
        if let Some(pat) = &self.f_pat {
            config.f_pat = Some(pat.clone());
        }
        if self.overwrite {
            config.overwrite = true;
        }
        if let Some(dir) = &self.model_dir {
            config.model_dir = dir.clone();
        }

        if let Some(python) = &self.python {
            config.launcher.python = Some(python.clone());
        }
        if let Some(script) = &self.train_script {
            config.launcher.train_script = script.clone();
        }
        if let Some(secs) = self.timeout_secs {
            config.launcher.timeout_secs = Some(secs);
        }

        let train = &mut config.train;
        if let Some(dir) = &self.work_dir {
            train.work_dir = Some(dir.clone());
        }
        if let Some(ckpt) = &self.resume_from {
            train.resume_from = Some(ckpt.clone());
        }
        if self.no_validate {
            train.no_validate = true;
        }
        // --gpus and --gpu-ids replace each other, whichever source set the other.
        if let Some(gpus) = self.gpus {
            train.gpus = Some(gpus);
            train.gpu_ids.clear();
        } else if !self.gpu_ids.is_empty() {
            train.gpu_ids = self.gpu_ids.clone();
            train.gpus = None;
        }
        if let Some(seed) = self.seed {
            train.seed = Some(seed);
        }
        if self.deterministic {
            train.deterministic = true;
        }
        if !self.options.is_empty() {
            train.options = self.options.clone();
        }
        if !self.cfg_options.is_empty() {
            train.cfg_options = self.cfg_options.clone();
        }
        if let Some(launcher) = self.launcher {
            train.launcher = launcher;
        }
        if let Some(rank) = self.local_rank {
            train.local_rank = rank;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "batchtrain", "batchtrain")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "batchtrain.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    // Resolve workspace
    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if let Some(command) = &cli.command {
        return commands::handle_command(command, &workspace, cli.config.as_deref(), |config| {
            cli.apply_overrides(config)
        });
    }

    let mut config = batchtrain_core::load_config(Some(&workspace), cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    cli.apply_overrides(&mut config);

    commands::run_batch(config, &workspace, cli.dry_run, cli.json).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("batchtrain").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_original_flag_spellings() {
        let cli = parse(&[
            "--config_dir",
            "configs/lt_config",
            "--f_pat",
            "faster*.py,retina*.py",
            "--overwrite",
            "--model-dir",
            "runs",
            "--local_rank",
            "3",
        ]);
        let mut config = BatchConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.config_dir, Some(PathBuf::from("configs/lt_config")));
        assert_eq!(config.f_pat.as_deref(), Some("faster*.py,retina*.py"));
        assert!(config.overwrite);
        assert_eq!(config.model_dir, PathBuf::from("runs"));
        assert_eq!(config.train.local_rank, 3);
    }

    #[test]
    fn test_pass_through_flags() {
        let cli = parse(&[
            "--config_dir",
            "configs",
            "--work-dir",
            "out",
            "--no-validate",
            "--gpu-ids",
            "0",
            "1",
            "--seed",
            "42",
            "--deterministic",
            "--cfg-options",
            "optimizer.lr=0.01",
            "runner.max_epochs=24",
            "--launcher",
            "pytorch",
        ]);
        let mut config = BatchConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(
            config.train.to_args(),
            vec![
                "--work-dir",
                "out",
                "--no-validate",
                "--gpu-ids",
                "0",
                "1",
                "--seed",
                "42",
                "--deterministic",
                "--cfg-options",
                "optimizer.lr=0.01",
                "runner.max_epochs=24",
                "--launcher",
                "pytorch",
            ]
        );
    }

    #[test]
    fn test_gpus_conflicts_with_gpu_ids() {
        let result = Cli::try_parse_from(["batchtrain", "--gpus", "2", "--gpu-ids", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_malformed_override() {
        let result = Cli::try_parse_from(["batchtrain", "--cfg-options", "lr0.01"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_unknown_launcher() {
        let result = Cli::try_parse_from(["batchtrain", "--launcher", "k8s"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_gpus_replace_configured_gpu_ids() {
        let cli = parse(&["--gpus", "4"]);
        let mut config = BatchConfig::default();
        config.train.gpu_ids = vec![0, 1];
        cli.apply_overrides(&mut config);
        assert_eq!(config.train.gpus, Some(4));
        assert!(config.train.gpu_ids.is_empty());
    }

    #[test]
    fn test_absent_flags_keep_config_values() {
        let cli = parse(&[]);
        let mut config = BatchConfig::default();
        config.overwrite = true;
        config.train.seed = Some(9);
        cli.apply_overrides(&mut config);
        assert!(config.overwrite);
        assert_eq!(config.train.seed, Some(9));
    }
}
