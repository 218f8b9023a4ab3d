//! End-to-end batch tests against a stand-in training script.
//!
//! The script plays the part of the training framework: it writes a
//! checkpoint into `work_dirs/<config stem>/` and appends the run to a log,
//! or exits non-zero for configs whose name contains `broken`.

#![cfg(unix)]

use batchtrain_core::{
    BatchConfig, BatchError, BatchTrainer, LauncherConfig, ProcessLauncher, TrainOptions,
};
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const FAKE_TRAIN: &str = r#"cfg="$1"
shift
name=$(basename "$cfg" .py)
echo "$name $*" >> launched.log
case "$name" in
  *broken*) exit 1 ;;
esac
mkdir -p "work_dirs/$name"
touch "work_dirs/$name/latest.pth"
"#;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new(configs: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("train.sh"), FAKE_TRAIN).unwrap();
        for rel in configs {
            let path = dir.path().join("configs").join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, "_base_ = '../_base_/default_runtime.py'\n").unwrap();
        }
        Self { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn config(&self, f_pat: Option<&str>, overwrite: bool) -> BatchConfig {
        BatchConfig {
            config_dir: Some(self.root().join("configs")),
            f_pat: f_pat.map(str::to_string),
            overwrite,
            model_dir: self.root().join("work_dirs"),
            launcher: LauncherConfig {
                python: Some(PathBuf::from("/bin/sh")),
                train_script: self.root().join("train.sh"),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn trainer(&self, config: BatchConfig) -> BatchTrainer<ProcessLauncher> {
        let launcher = ProcessLauncher::from_config(&config.launcher, self.root());
        BatchTrainer::new(config, launcher).unwrap()
    }

    fn launched(&self) -> Vec<String> {
        std::fs::read_to_string(self.root().join("launched.log"))
            .unwrap_or_default()
            .lines()
            .map(|l| l.trim_end().to_string())
            .collect()
    }

    fn mark_trained(&self, run: &str) {
        let dir = self.root().join("work_dirs").join(run);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("epoch_12.pth"), b"").unwrap();
    }
}

#[tokio::test]
async fn test_trains_only_untrained_configs() {
    let fx = Fixture::new(&["exp1.py", "exp2.py"]);
    fx.mark_trained("exp1");

    let report = fx.trainer(fx.config(None, false)).run().await.unwrap();

    assert_eq!(fx.launched(), vec!["exp2"]);
    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.completed[0].run_id, "exp2");
    assert_eq!(report.skipped, 1);
}

#[tokio::test]
async fn test_second_batch_is_a_no_op() {
    let fx = Fixture::new(&["faster_rcnn/r50.py", "retinanet/r101.py"]);

    fx.trainer(fx.config(None, false)).run().await.unwrap();
    assert_eq!(fx.launched(), vec!["r50", "r101"]);

    let report = fx.trainer(fx.config(None, false)).run().await.unwrap();
    assert!(report.completed.is_empty());
    assert_eq!(report.skipped, 2);
    assert_eq!(fx.launched().len(), 2);
}

#[tokio::test]
async fn test_overwrite_retrains_everything() {
    let fx = Fixture::new(&["exp1.py", "exp2.py"]);
    fx.mark_trained("exp1");
    fx.mark_trained("exp2");

    let report = fx.trainer(fx.config(None, true)).run().await.unwrap();
    assert_eq!(report.completed.len(), 2);
    assert_eq!(fx.launched(), vec!["exp1", "exp2"]);
}

#[tokio::test]
async fn test_pattern_union() {
    let fx = Fixture::new(&["a1.py", "a2.py", "b1.py", "c1.py"]);

    fx.trainer(fx.config(Some("a*.py,b*.py,a1*"), false))
        .run()
        .await
        .unwrap();
    assert_eq!(fx.launched(), vec!["a1", "a2", "b1"]);
}

#[tokio::test]
async fn test_failing_run_stops_batch() {
    let fx = Fixture::new(&["a.py", "b_broken.py", "c.py"]);

    let err = fx
        .trainer(fx.config(None, false))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, BatchError::RunFailed { ref run_id, .. } if run_id == "b_broken"));
    assert_eq!(fx.launched(), vec!["a", "b_broken"]);
    assert!(!fx.root().join("work_dirs").join("c").exists());
}

#[tokio::test]
async fn test_shared_options_reach_every_run() {
    let fx = Fixture::new(&["exp1.py", "exp2.py"]);
    let mut config = fx.config(None, false);
    config.train = TrainOptions {
        no_validate: true,
        gpus: Some(2),
        cfg_options: vec!["optimizer.lr=0.01".to_string()],
        ..Default::default()
    };

    fx.trainer(config).run().await.unwrap();
    assert_eq!(
        fx.launched(),
        vec![
            "exp1 --no-validate --gpus 2 --cfg-options optimizer.lr=0.01",
            "exp2 --no-validate --gpus 2 --cfg-options optimizer.lr=0.01",
        ]
    );
}
