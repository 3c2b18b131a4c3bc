//! LoRA training pipeline.
//!
//! One linear pass per request: validate, decode and stage the uploads,
//! allocate the adapter directory, train, record `meta.json`, back up the
//! audio, commit the volume. Nothing is rolled back on failure; retraining
//! under the same name overwrites.

pub mod trainer;

pub use trainer::{select_trainer, NativeTrainer, ProcessTrainer, Trainer, TRAIN_CONFIG_FILE};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use lora_store::{validate_name, LoraMeta, LoraStore, TrainingMethod};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::{AudioUpload, TrainRequest};

/// Everything a trainer needs to know about one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingJob {
    pub lora_name: String,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub epochs: u32,
    pub learning_rate: f64,
    pub rank: u32,
    pub batch_size: u32,
    pub save_every: u32,
}

/// Problems with a training request.
#[derive(Debug, Error)]
pub enum TrainInputError {
    #[error("at least one audio file is required")]
    NoAudioFiles,

    #[error("audio file '{name}' is not valid base64: {source}")]
    InvalidAudio {
        name: String,
        #[source]
        source: base64::DecodeError,
    },
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOutcome {
    pub lora_name: String,
    pub training_method: TrainingMethod,
    pub message: String,
}

/// Reduce an uploaded filename to something safe to create in a flat dir.
///
/// Keeps only the final path component; anything unusable becomes
/// `track_<n>.wav`.
pub fn staged_file_name(name: Option<&str>, index: usize) -> String {
    let fallback = || format!("track_{}.wav", index);
    let Some(name) = name else {
        return fallback();
    };

    let last = name
        .rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .unwrap_or_default();
    if last.is_empty() || last == "." || last == ".." {
        fallback()
    } else {
        last.to_string()
    }
}

/// Decoded upload ready to be staged.
struct DecodedUpload {
    file_name: String,
    bytes: Vec<u8>,
}

fn decode_uploads(uploads: &[AudioUpload]) -> Result<Vec<DecodedUpload>, TrainInputError> {
    if uploads.is_empty() {
        return Err(TrainInputError::NoAudioFiles);
    }

    let mut seen = HashSet::new();
    let mut decoded = Vec::with_capacity(uploads.len());
    for (index, upload) in uploads.iter().enumerate() {
        let base = staged_file_name(upload.name.as_deref(), index);
        let mut file_name = base.clone();
        let mut prefix = index;
        while !seen.insert(file_name.clone()) {
            file_name = format!("{}_{}", prefix, base);
            prefix += 1;
        }

        let compact: String = upload.data.split_whitespace().collect();
        let bytes = BASE64
            .decode(compact.as_bytes())
            .map_err(|source| TrainInputError::InvalidAudio {
                name: file_name.clone(),
                source,
            })?;

        decoded.push(DecodedUpload { file_name, bytes });
    }
    Ok(decoded)
}

pub struct TrainingOrchestrator {
    store: Arc<LoraStore>,
    trainer: Arc<dyn Trainer>,
    scratch_root: PathBuf,
    checkpoint_dir: PathBuf,
}

impl TrainingOrchestrator {
    pub fn new(
        store: Arc<LoraStore>,
        trainer: Arc<dyn Trainer>,
        scratch_root: impl Into<PathBuf>,
        checkpoint_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            trainer,
            scratch_root: scratch_root.into(),
            checkpoint_dir: checkpoint_dir.into(),
        }
    }

    /// Method the configured trainer uses when it succeeds.
    pub fn trainer_method(&self) -> TrainingMethod {
        self.trainer.method()
    }

    #[tracing::instrument(skip_all, fields(lora.name = %request.lora_name, job.kind = "lora_training", num_files = request.audio_files.len()))]
    pub async fn train(&self, request: TrainRequest) -> Result<TrainOutcome> {
        let lora_name = validate_name(&request.lora_name)?.to_string();
        let uploads = decode_uploads(&request.audio_files)?;

        let store = self.store.clone();
        let scratch_root = self.scratch_root.clone();
        let name = lora_name.clone();
        let (staging, staged, output_dir) = crate::blocking(move || {
            std::fs::create_dir_all(&scratch_root).with_context(|| {
                format!("failed to create scratch root {}", scratch_root.display())
            })?;
            let staging = tempfile::Builder::new()
                .prefix("train_")
                .tempdir_in(&scratch_root)
                .context("failed to create training staging dir")?;
            let staged = stage_uploads(&staging.path().join("data"), &uploads)?;
            let output_dir = store.ensure_adapter_dir(&name)?;
            Ok((staging, staged, output_dir))
        })
        .await?;
        let data_dir = staging.path().join("data");
        let num_files = staged.len();
        tracing::info!(files = num_files, dir = %data_dir.display(), "staged training audio");

        let job = TrainingJob {
            lora_name: lora_name.clone(),
            data_dir,
            output_dir: output_dir.clone(),
            checkpoint_dir: self.checkpoint_dir.clone(),
            epochs: request.epochs,
            learning_rate: request.learning_rate,
            rank: request.lora_rank,
            batch_size: request.batch_size,
            save_every: request.save_every,
        };

        let training_method = self.trainer.train(&job, staging.path()).await?;

        let meta = LoraMeta {
            created_at: chrono::Utc::now(),
            epochs: job.epochs,
            rank: job.rank,
            num_files: num_files as u32,
            training_method,
            learning_rate: job.learning_rate,
            batch_size: job.batch_size,
            save_every: job.save_every,
        };
        let store = self.store.clone();
        let name = lora_name.clone();
        let backed_up = crate::blocking(move || {
            store.write_meta(&name, &meta)?;
            let backed_up = store.backup_training_data(&name, &staged)?;
            store.commit()?;
            if let Err(e) = staging.close() {
                tracing::warn!(error = %e, "failed to remove training staging dir");
            }
            Ok(backed_up)
        })
        .await?;
        tracing::info!(method = %training_method, backed_up, "training run recorded");

        let message = match training_method {
            TrainingMethod::ManualSetup => format!(
                "Training data for '{}' saved ({} files). Automatic training was unavailable; run the trainer manually against {}",
                lora_name,
                num_files,
                self.store.training_data_dir(&lora_name).display()
            ),
            _ => format!(
                "LoRA '{}' trained on {} files for {} epochs",
                lora_name,
                num_files,
                job.epochs
            ),
        };

        Ok(TrainOutcome {
            lora_name,
            training_method,
            message,
        })
    }
}

fn stage_uploads(data_dir: &Path, uploads: &[DecodedUpload]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    uploads
        .iter()
        .map(|upload| {
            let path = data_dir.join(&upload.file_name);
            std::fs::write(&path, &upload.bytes)
                .with_context(|| format!("failed to stage {}", path.display()))?;
            Ok(path)
        })
        .collect()
}
