//! LoraStore: LoRA adapters laid out on a shared volume.
//!
//! Layout:
//! ```text
//! {root}/
//! ├── jazz-piano/
//! │   ├── adapter_model.safetensors
//! │   ├── meta.json
//! │   └── training_data/
//! │       ├── take1.wav
//! │       └── take2.wav
//! └── lofi/
//!     └── meta.json          # manual setup pending, no weights yet
//! ```
//!
//! Every read refreshes the volume first. Nothing is cached between calls.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LoraStoreConfig;
use crate::metadata::{LoraMeta, MetaFields, META_FILE};
use crate::volume::{LocalVolume, Volume};

/// Extensions recognised as adapter weights.
pub const WEIGHT_EXTENSIONS: &[&str] = &["safetensors", "bin"];

/// Subdirectory holding a copy of the audio an adapter was trained on.
pub const TRAINING_DATA_DIR: &str = "training_data";

/// One row of an adapter listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterSummary {
    pub name: String,
    pub has_weights: bool,
    pub created_at: Option<serde_json::Value>,
    pub epochs: Option<u64>,
    pub rank: Option<u64>,
    pub num_files: Option<u64>,
}

impl AdapterSummary {
    fn new(name: String, has_weights: bool, meta: MetaFields) -> Self {
        Self {
            name,
            has_weights,
            created_at: meta.created_at,
            epochs: meta.epochs,
            rank: meta.rank,
            num_files: meta.num_files,
        }
    }
}

/// Rejected adapter names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("lora_name is required")]
    Empty,

    #[error("invalid lora_name '{0}': must be a single path component")]
    Invalid(String),
}

/// Check that `name` can be used as an adapter directory name.
///
/// Returns the trimmed name.
pub fn validate_name(name: &str) -> Result<&str, NameError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(NameError::Empty);
    }
    if trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\', '\0'])
    {
        return Err(NameError::Invalid(trimmed.to_string()));
    }
    Ok(trimmed)
}

/// Read access to persisted adapters.
///
/// Implementations must observe writes made by other processes, so each call
/// is expected to refresh its view of storage.
pub trait AdapterRegistry: Send + Sync {
    /// All adapters, sorted by name.
    fn list(&self) -> Result<Vec<AdapterSummary>>;

    /// Path to the adapter's weights file.
    ///
    /// Returns `Ok(None)` if the adapter directory or its weights are absent.
    fn resolve(&self, name: &str) -> Result<Option<PathBuf>>;
}

/// Filesystem-backed adapter store.
#[derive(Clone)]
pub struct LoraStore {
    config: LoraStoreConfig,
    volume: Arc<dyn Volume>,
}

impl std::fmt::Debug for LoraStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoraStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LoraStore {
    /// Create a store over `volume`.
    ///
    /// Creates the root directory unless in read-only mode.
    pub fn new(config: LoraStoreConfig, volume: Arc<dyn Volume>) -> Result<Self> {
        if !config.read_only {
            fs::create_dir_all(&config.root).with_context(|| {
                format!("failed to create adapter root {}", config.root.display())
            })?;
        }

        Ok(Self { config, volume })
    }

    /// Create a writable store on a plain local directory.
    pub fn at_path(path: impl Into<PathBuf>) -> Result<Self> {
        let config = LoraStoreConfig::with_root(path);
        let volume = Arc::new(LocalVolume::new(config.root.clone()));
        Self::new(config, volume)
    }

    /// Directory an adapter lives in. Does not check that it exists.
    pub fn adapter_dir(&self, name: &str) -> PathBuf {
        self.config.root.join(name)
    }

    pub fn training_data_dir(&self, name: &str) -> PathBuf {
        self.adapter_dir(name).join(TRAINING_DATA_DIR)
    }

    /// Refresh the local view of the volume.
    ///
    /// A failed refresh is logged and the read proceeds against whatever is
    /// visible locally.
    pub fn refresh(&self) {
        if let Err(e) = self.volume.reload() {
            tracing::warn!(error = %e, root = %self.config.root.display(), "volume reload failed");
        }
    }

    /// Allocate the output directory for a new training run.
    ///
    /// An existing directory is reused once the previous run's weights,
    /// `meta.json` and `training_data/` are removed. Anything else in it is
    /// left alone.
    pub fn ensure_adapter_dir(&self, name: &str) -> Result<PathBuf> {
        self.ensure_writable()?;
        let name = validate_name(name)?;

        let dir = self.adapter_dir(name);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create adapter directory {}", dir.display()))?;

        let cleared = clear_previous_run(&dir)?;
        if cleared > 0 {
            tracing::info!(lora.name = %name, cleared, "cleared previous training run");
        }
        Ok(dir)
    }

    /// Write `meta.json` for an adapter, replacing any previous run's record.
    pub fn write_meta(&self, name: &str, meta: &LoraMeta) -> Result<PathBuf> {
        self.ensure_writable()?;
        let dir = self.adapter_dir(validate_name(name)?);
        let path = dir.join(META_FILE);

        let json = serde_json::to_string_pretty(meta).context("failed to serialize meta.json")?;
        fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;

        tracing::debug!(lora.name = %name, path = %path.display(), "wrote adapter metadata");
        Ok(path)
    }

    /// Read the listing fields of an adapter's `meta.json`.
    ///
    /// Returns `Ok(None)` when the file does not exist and an error when it
    /// exists but is not valid JSON.
    pub fn read_meta(&self, name: &str) -> Result<Option<MetaFields>> {
        let path = self.adapter_dir(name).join(META_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&json)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(MetaFields::from_json(&value)))
    }

    /// Copy staged training audio into `{name}/training_data/`.
    ///
    /// Returns the number of files copied.
    pub fn backup_training_data(&self, name: &str, files: &[PathBuf]) -> Result<usize> {
        self.ensure_writable()?;
        let dest = self.training_data_dir(validate_name(name)?);
        fs::create_dir_all(&dest)
            .with_context(|| format!("failed to create {}", dest.display()))?;

        let mut copied = 0;
        for src in files {
            let Some(file_name) = src.file_name() else {
                continue;
            };
            fs::copy(src, dest.join(file_name))
                .with_context(|| format!("failed to back up {}", src.display()))?;
            copied += 1;
        }

        Ok(copied)
    }

    /// Publish writes to other readers of the volume.
    pub fn commit(&self) -> Result<()> {
        self.volume.commit().context("failed to commit adapter volume")
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.config.read_only {
            anyhow::bail!("adapter store is in read-only mode");
        }
        Ok(())
    }

    fn summarize(&self, name: String) -> AdapterSummary {
        let dir = self.adapter_dir(&name);
        let has_weights = match find_weights(&dir) {
            Ok(weights) => weights.is_some(),
            Err(e) => {
                tracing::warn!(lora.name = %name, error = %format!("{:#}", e), "unreadable adapter directory, reporting no weights");
                false
            }
        };

        let meta = match self.read_meta(&name) {
            Ok(meta) => meta.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(lora.name = %name, error = %format!("{:#}", e), "skipping unreadable meta.json");
                MetaFields::default()
            }
        };

        AdapterSummary::new(name, has_weights, meta)
    }
}

impl AdapterRegistry for LoraStore {
    fn list(&self) -> Result<Vec<AdapterSummary>> {
        self.refresh();

        let root = &self.config.root;
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(root)
            .with_context(|| format!("failed to read adapter root {}", root.display()))?
        {
            let entry = entry.context("failed to read adapter root entry")?;
            if !entry.path().is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => {
                    tracing::warn!(name = ?raw, "skipping adapter directory with non-UTF-8 name");
                }
            }
        }
        names.sort();

        Ok(names.into_iter().map(|name| self.summarize(name)).collect())
    }

    fn resolve(&self, name: &str) -> Result<Option<PathBuf>> {
        let Ok(name) = validate_name(name) else {
            return Ok(None);
        };

        self.refresh();
        find_weights(&self.adapter_dir(name))
    }
}

/// First weights file in `dir` by file name, if any.
pub fn find_weights(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut weights = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry.context("failed to read adapter entry")?.path();
        if is_weights_file(&path) {
            weights.push(path);
        }
    }
    weights.sort();

    Ok(weights.into_iter().next())
}

fn is_weights_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| WEIGHT_EXTENSIONS.contains(&ext))
}

/// Remove what a training run leaves behind. Returns how many entries went.
fn clear_previous_run(dir: &Path) -> Result<usize> {
    let mut cleared = 0;
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry.context("failed to read adapter entry")?.path();
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();

        if path.is_dir() && file_name == TRAINING_DATA_DIR {
            fs::remove_dir_all(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        } else if is_weights_file(&path) || (path.is_file() && file_name == META_FILE) {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        } else {
            continue;
        }
        cleared += 1;
    }
    Ok(cleared)
}
