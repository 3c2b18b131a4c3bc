//! Trainer implementations and the one-time choice between them.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use aceconf::{TrainerChoice, TrainingConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use lora_store::TrainingMethod;
use serde::Serialize;

use super::TrainingJob;
use crate::inference::WorkerClient;

/// File name of the config handed to the out-of-process trainer.
pub const TRAIN_CONFIG_FILE: &str = "train_config.toml";

/// Runs a training job.
#[async_trait]
pub trait Trainer: Send + Sync {
    /// The method this trainer uses when everything works.
    fn method(&self) -> TrainingMethod;

    /// Train, returning the method that actually ran.
    ///
    /// `workdir` is a scratch directory owned by the caller for the duration
    /// of the call.
    async fn train(&self, job: &TrainingJob, workdir: &Path) -> Result<TrainingMethod>;
}

/// Trains inside the inference worker.
pub struct NativeTrainer {
    worker: Arc<WorkerClient>,
}

impl NativeTrainer {
    pub fn new(worker: Arc<WorkerClient>) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl Trainer for NativeTrainer {
    fn method(&self) -> TrainingMethod {
        TrainingMethod::Native
    }

    async fn train(&self, job: &TrainingJob, _workdir: &Path) -> Result<TrainingMethod> {
        let status = self.worker.train(job).await?;
        tracing::info!(lora.name = %job.lora_name, status = %status, "native training finished");
        Ok(TrainingMethod::Native)
    }
}

#[derive(Serialize)]
struct TrainConfigFile<'a> {
    training: &'a TrainingJob,
}

/// Spawns `program args --config <workdir>/train_config.toml`.
///
/// A trainer that cannot be started or exits non-zero downgrades the run to
/// [`TrainingMethod::ManualSetup`]. Running past the timeout kills the child
/// and fails the run.
#[derive(Debug, Clone)]
pub struct ProcessTrainer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessTrainer {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &TrainingConfig) -> Self {
        Self::new(
            config.program.clone(),
            config.args.clone(),
            Duration::from_secs(config.effective_timeout_secs()),
        )
    }

    fn write_config(&self, job: &TrainingJob, workdir: &Path) -> Result<PathBuf> {
        let path = workdir.join(TRAIN_CONFIG_FILE);
        let rendered = toml::to_string_pretty(&TrainConfigFile { training: job })
            .context("failed to render trainer config")?;
        std::fs::write(&path, rendered)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

#[async_trait]
impl Trainer for ProcessTrainer {
    fn method(&self) -> TrainingMethod {
        TrainingMethod::Subprocess
    }

    #[tracing::instrument(skip_all, fields(lora.name = %job.lora_name, program = %self.program))]
    async fn train(&self, job: &TrainingJob, workdir: &Path) -> Result<TrainingMethod> {
        let config_path = self.write_config(job, workdir)?;

        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg("--config")
            .arg(&config_path)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(error = %e, "trainer could not be started, manual setup required");
                return Ok(TrainingMethod::ManualSetup);
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.context("failed to wait for trainer")?,
            Err(_) => anyhow::bail!("training timed out after {}s", self.timeout.as_secs()),
        };

        if output.status.success() {
            tracing::info!("subprocess training finished");
            Ok(TrainingMethod::Subprocess)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(20)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            tracing::warn!(
                exit = %output.status,
                stderr = %tail,
                "trainer exited unsuccessfully, manual setup required"
            );
            Ok(TrainingMethod::ManualSetup)
        }
    }
}

/// Pick the trainer once at startup.
///
/// `auto` asks the worker whether it can train in-process and falls back to
/// the subprocess trainer if it cannot, or cannot be reached.
pub async fn select_trainer(config: &TrainingConfig, worker: Arc<WorkerClient>) -> Arc<dyn Trainer> {
    match config.trainer {
        TrainerChoice::Native => Arc::new(NativeTrainer::new(worker)),
        TrainerChoice::Subprocess => Arc::new(ProcessTrainer::from_config(config)),
        TrainerChoice::Auto => match worker.capabilities().await {
            Ok(caps) if caps.training => {
                tracing::info!("worker supports in-process training");
                Arc::new(NativeTrainer::new(worker))
            }
            Ok(_) => {
                tracing::info!(program = %config.program, "worker cannot train, using subprocess trainer");
                Arc::new(ProcessTrainer::from_config(config))
            }
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "capability probe failed, using subprocess trainer");
                Arc::new(ProcessTrainer::from_config(config))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn job(workdir: &Path) -> TrainingJob {
        TrainingJob {
            lora_name: "jazz".into(),
            data_dir: workdir.join("data"),
            output_dir: PathBuf::from("/loras/jazz"),
            checkpoint_dir: PathBuf::from("/opt/ACE-Step/checkpoints"),
            epochs: 3,
            learning_rate: 1e-4,
            rank: 8,
            batch_size: 1,
            save_every: 1,
        }
    }

    fn sh(script: &str, timeout: Duration) -> ProcessTrainer {
        ProcessTrainer::new("sh", vec!["-c".into(), script.into(), "trainer".into()], timeout)
    }

    #[tokio::test]
    async fn test_config_file_contents() {
        let dir = TempDir::new().unwrap();
        // `$2` is the config path after `--config`.
        let trainer = sh("test -f \"$2\"", Duration::from_secs(10));
        let method = trainer.train(&job(dir.path()), dir.path()).await.unwrap();
        assert_eq!(method, TrainingMethod::Subprocess);

        let written = std::fs::read_to_string(dir.path().join(TRAIN_CONFIG_FILE)).unwrap();
        let table: toml::Table = written.parse().unwrap();
        let training = table["training"].as_table().unwrap();
        assert_eq!(training["lora_name"].as_str(), Some("jazz"));
        assert_eq!(training["rank"].as_integer(), Some(8));
        assert_eq!(training["output_dir"].as_str(), Some("/loras/jazz"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_manual_setup() {
        let dir = TempDir::new().unwrap();
        let trainer = sh("echo boom >&2; exit 3", Duration::from_secs(10));
        let method = trainer.train(&job(dir.path()), dir.path()).await.unwrap();
        assert_eq!(method, TrainingMethod::ManualSetup);
    }

    #[tokio::test]
    async fn test_missing_program_is_manual_setup() {
        let dir = TempDir::new().unwrap();
        let trainer = ProcessTrainer::new("acestep-trainer-that-does-not-exist", vec![], Duration::from_secs(10));
        let method = trainer.train(&job(dir.path()), dir.path()).await.unwrap();
        assert_eq!(method, TrainingMethod::ManualSetup);
    }

    #[tokio::test]
    async fn test_timeout_fails() {
        let dir = TempDir::new().unwrap();
        let trainer = sh("sleep 30", Duration::from_millis(200));
        let err = trainer.train(&job(dir.path()), dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_timeout_capped_from_config() {
        let config = TrainingConfig {
            timeout_secs: 10_000,
            ..Default::default()
        };
        let trainer = ProcessTrainer::from_config(&config);
        assert_eq!(trainer.timeout, Duration::from_secs(3600));
        assert_eq!(trainer.method(), TrainingMethod::Subprocess);
    }

    #[tokio::test]
    async fn test_select_falls_back_when_worker_unreachable() {
        let worker = Arc::new(WorkerClient::new("http://127.0.0.1:1", Duration::from_millis(300)));
        let trainer = select_trainer(&TrainingConfig::default(), worker.clone()).await;
        assert_eq!(trainer.method(), TrainingMethod::Subprocess);

        let forced = TrainingConfig {
            trainer: TrainerChoice::Native,
            ..Default::default()
        };
        let trainer = select_trainer(&forced, worker).await;
        assert_eq!(trainer.method(), TrainingMethod::Native);
    }
}
