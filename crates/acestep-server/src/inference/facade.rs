//! The loaded model pair and the single lock around it.
//!
//! An [`InferenceFacade`] only exists once the DiT is up, so "ready" is a
//! property of having one at all. The LM is best-effort: if it fails to
//! initialize the facade keeps serving with the DiT alone.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use aceconf::AceConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::params::{GenerationConfig, GenerationParams, GenerationResult};

/// DiT startup options, as sent to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DitSettings {
    pub project_root: PathBuf,
    pub config_path: String,
    pub device: String,
    pub use_flash_attention: bool,
    pub compile_model: bool,
    pub offload_to_cpu: bool,
    pub offload_dit_to_cpu: bool,
}

impl DitSettings {
    pub fn from_config(config: &AceConfig) -> Self {
        let model = &config.model;
        Self {
            project_root: config.infra.paths.project_root.clone(),
            config_path: model.dit_config.clone(),
            device: model.device.clone(),
            use_flash_attention: model.use_flash_attention,
            compile_model: model.compile_model,
            offload_to_cpu: model.offload_to_cpu,
            offload_dit_to_cpu: model.offload_dit_to_cpu,
        }
    }
}

/// 5Hz LM startup options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LmSettings {
    pub checkpoint_dir: PathBuf,
    pub lm_model_path: String,
    pub backend: String,
    pub device: String,
}

impl LmSettings {
    /// `None` when the LM is disabled in config.
    pub fn from_config(config: &AceConfig) -> Option<Self> {
        let model = &config.model;
        if !model.lm_enabled() {
            return None;
        }

        Some(Self {
            checkpoint_dir: config.infra.paths.checkpoint_dir(),
            lm_model_path: model.lm_model.clone(),
            backend: model.lm_backend.clone(),
            device: model.device.clone(),
        })
    }
}

/// The diffusion model.
#[async_trait]
pub trait DitHandler: Send + Sync {
    /// Load the model. Returns the handler's status line.
    async fn initialize(&self, settings: &DitSettings) -> Result<String>;

    /// Swap the active LoRA weights.
    async fn load_lora(&self, path: &Path) -> Result<()>;

    /// Run one generation, writing audio into `save_dir`.
    async fn generate(
        &self,
        params: &GenerationParams,
        config: &GenerationConfig,
        save_dir: &Path,
        use_lm: bool,
    ) -> Result<GenerationResult>;
}

/// The auxiliary 5Hz language model.
#[async_trait]
pub trait LmHandler: Send + Sync {
    async fn initialize(&self, settings: &LmSettings) -> Result<String>;
}

#[derive(Debug, Default)]
struct AdapterState {
    active: Option<PathBuf>,
}

pub struct InferenceFacade {
    dit: Arc<dyn DitHandler>,
    lm_available: bool,
    adapter: Mutex<AdapterState>,
}

impl InferenceFacade {
    /// Bring the models up.
    ///
    /// A DiT failure is returned as an error. An LM failure is logged and the
    /// facade comes up without it.
    #[tracing::instrument(skip_all, fields(dit.config = %dit_settings.config_path, lm.enabled = lm.is_some()))]
    pub async fn initialize(
        dit: Arc<dyn DitHandler>,
        dit_settings: &DitSettings,
        lm: Option<(Arc<dyn LmHandler>, LmSettings)>,
    ) -> Result<Self> {
        let status = dit
            .initialize(dit_settings)
            .await
            .with_context(|| format!("DiT init failed for {}", dit_settings.config_path))?;
        tracing::info!(status = %status, "DiT loaded: {}", dit_settings.config_path);

        let lm_available = match lm {
            Some((handler, settings)) => match handler.initialize(&settings).await {
                Ok(status) => {
                    tracing::info!(
                        status = %status,
                        backend = %settings.backend,
                        "LM loaded: {}",
                        settings.lm_model_path
                    );
                    true
                }
                Err(e) => {
                    tracing::warn!(error = %format!("{:#}", e), "LM init failed, continuing without LM");
                    false
                }
            },
            None => {
                tracing::info!("LM disabled");
                false
            }
        };

        Ok(Self {
            dit,
            lm_available,
            adapter: Mutex::new(AdapterState::default()),
        })
    }

    pub fn lm_available(&self) -> bool {
        self.lm_available
    }

    /// Weights file of the adapter currently applied, if any.
    pub async fn active_adapter(&self) -> Option<PathBuf> {
        self.adapter.lock().await.active.clone()
    }

    /// Apply `adapter` (if given) and generate, holding the lock across both
    /// so no other request can swap weights in between.
    ///
    /// A failed swap is logged and the previously active adapter (or none)
    /// stays in place. `None` leaves the active adapter untouched.
    #[tracing::instrument(skip_all, fields(adapter = ?adapter))]
    pub async fn generate_with_adapter(
        &self,
        adapter: Option<&Path>,
        params: &GenerationParams,
        config: &GenerationConfig,
        save_dir: &Path,
    ) -> Result<GenerationResult> {
        let mut state = self.adapter.lock().await;
        if let Some(path) = adapter {
            self.load_adapter_locked(&mut state, path).await;
        }
        self.generate_locked(params, config, save_dir).await
    }

    async fn load_adapter_locked(&self, state: &mut AdapterState, path: &Path) {
        match self.dit.load_lora(path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "LoRA loaded");
                state.active = Some(path.to_path_buf());
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %format!("{:#}", e),
                    "LoRA load failed, continuing with previous weights"
                );
            }
        }
    }

    async fn generate_locked(
        &self,
        params: &GenerationParams,
        config: &GenerationConfig,
        save_dir: &Path,
    ) -> Result<GenerationResult> {
        let result = self
            .dit
            .generate(params, config, save_dir, self.lm_available)
            .await
            .context("generation call failed")?;

        if result.success {
            tracing::info!(output.count = result.audios.len(), "generation finished");
        } else {
            tracing::warn!(reason = %result.failure_message(), "generation reported failure");
        }
        Ok(result)
    }
}
