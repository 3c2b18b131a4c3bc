//! Layered configuration for the ACE-Step server.
//!
//! Configuration is split into three sections:
//!
//! - **Infrastructure** (`InfraConfig`): paths, bind address, telemetry and
//!   volume hooks. Fixed for the life of the process.
//! - **Model** (`ModelConfig`): which worker to talk to and what it loads at
//!   startup.
//! - **Training** (`TrainingConfig`): trainer selection and the
//!   out-of-process trainer command.
//!
//! # Usage
//!
//! ```rust,no_run
//! use aceconf::AceConfig;
//!
//! let config = AceConfig::load().expect("Failed to load config");
//! println!("Adapters live in {}", config.infra.paths.adapter_root.display());
//! println!("Worker at {}", config.model.worker_url);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, key by key):
//! 1. `/etc/acestep/config.toml` (system)
//! 2. `~/.config/acestep/config.toml` (user)
//! 3. `--config <path>` if given, otherwise `./acestep.toml`
//! 4. Environment variables (`ACESTEP_*`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! adapter_root = "/loras"
//! scratch_dir = "/tmp/acestep_audio"
//! project_root = "/opt/ACE-Step"
//!
//! [bind]
//! http_port = 8000
//! max_body_mb = 64
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info"
//!
//! [model]
//! worker_url = "http://127.0.0.1:8001"
//! dit_config = "acestep-v15-turbo"
//! lm_model = "acestep-5Hz-lm-4B"
//!
//! [training]
//! trainer = "auto"
//! program = "python"
//! args = ["-m", "acestep.train"]
//! timeout_secs = 3600
//! ```

pub mod infra;
pub mod loader;
pub mod runtime;

pub use infra::{BindConfig, InfraConfig, PathsConfig, TelemetryConfig, VolumeConfig};
pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use runtime::{ModelConfig, TrainerChoice, TrainingConfig, MAX_TRAINING_TIMEOUT_SECS};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete server configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AceConfig {
    #[serde(flatten)]
    pub infra: InfraConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub training: TrainingConfig,
}

impl AceConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an optional explicit file taking the place of
    /// `./acestep.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            merged = loader::merge_tables(merged, table);
            sources.files.push(path);
        }

        let origin = sources
            .files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let mut config = loader::from_table(merged, &origin)?;

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> String {
        let mut output = String::from("# ACE-Step server configuration\n\n");
        match toml::to_string_pretty(self) {
            Ok(body) => output.push_str(&body),
            Err(e) => output.push_str(&format!("# failed to render config: {}\n", e)),
        }
        output
    }
}
