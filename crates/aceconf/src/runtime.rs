//! Model and training settings - what the server loads and how it trains.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hard ceiling on an out-of-process training run.
pub const MAX_TRAINING_TIMEOUT_SECS: u64 = 3600;

/// How the inference worker is reached and what it loads at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base URL of the resident ACE-Step worker.
    /// Default: http://127.0.0.1:8001
    #[serde(default = "ModelConfig::default_worker_url")]
    pub worker_url: String,

    /// DiT configuration name passed to the worker.
    /// Default: acestep-v15-turbo
    #[serde(default = "ModelConfig::default_dit_config")]
    pub dit_config: String,

    /// Default: cuda
    #[serde(default = "ModelConfig::default_device")]
    pub device: String,

    #[serde(default = "default_true")]
    pub use_flash_attention: bool,

    #[serde(default)]
    pub compile_model: bool,

    #[serde(default)]
    pub offload_to_cpu: bool,

    #[serde(default)]
    pub offload_dit_to_cpu: bool,

    /// 5Hz LM checkpoint name under the checkpoint dir. Empty disables the LM.
    /// Default: acestep-5Hz-lm-4B
    #[serde(default = "ModelConfig::default_lm_model")]
    pub lm_model: String,

    /// Default: vllm
    #[serde(default = "ModelConfig::default_lm_backend")]
    pub lm_backend: String,

    /// Per-call timeout for worker requests other than training.
    /// Default: 600
    #[serde(default = "ModelConfig::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

impl ModelConfig {
    fn default_worker_url() -> String {
        "http://127.0.0.1:8001".to_string()
    }

    fn default_dit_config() -> String {
        "acestep-v15-turbo".to_string()
    }

    fn default_device() -> String {
        "cuda".to_string()
    }

    fn default_lm_model() -> String {
        "acestep-5Hz-lm-4B".to_string()
    }

    fn default_lm_backend() -> String {
        "vllm".to_string()
    }

    fn default_request_timeout_secs() -> u64 {
        600
    }

    pub fn lm_enabled(&self) -> bool {
        !self.lm_model.trim().is_empty()
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            worker_url: Self::default_worker_url(),
            dit_config: Self::default_dit_config(),
            device: Self::default_device(),
            use_flash_attention: true,
            compile_model: false,
            offload_to_cpu: false,
            offload_dit_to_cpu: false,
            lm_model: Self::default_lm_model(),
            lm_backend: Self::default_lm_backend(),
            request_timeout_secs: Self::default_request_timeout_secs(),
        }
    }
}

/// Which trainer implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainerChoice {
    /// Use the worker's in-process trainer when it advertises one, else a subprocess.
    #[default]
    Auto,
    Native,
    Subprocess,
}

impl fmt::Display for TrainerChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainerChoice::Auto => write!(f, "auto"),
            TrainerChoice::Native => write!(f, "native"),
            TrainerChoice::Subprocess => write!(f, "subprocess"),
        }
    }
}

impl FromStr for TrainerChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(TrainerChoice::Auto),
            "native" => Ok(TrainerChoice::Native),
            "subprocess" => Ok(TrainerChoice::Subprocess),
            other => Err(format!("unknown trainer '{}'", other)),
        }
    }
}

/// LoRA training settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default)]
    pub trainer: TrainerChoice,

    /// Program for the out-of-process trainer.
    /// Default: python
    #[serde(default = "TrainingConfig::default_program")]
    pub program: String,

    /// Arguments placed before `--config <file>`.
    /// Default: ["-m", "acestep.train"]
    #[serde(default = "TrainingConfig::default_args")]
    pub args: Vec<String>,

    /// Wall-clock limit for the out-of-process trainer, capped at one hour.
    /// Default: 3600
    #[serde(default = "TrainingConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl TrainingConfig {
    fn default_program() -> String {
        "python".to_string()
    }

    fn default_args() -> Vec<String> {
        vec!["-m".to_string(), "acestep.train".to_string()]
    }

    fn default_timeout_secs() -> u64 {
        MAX_TRAINING_TIMEOUT_SECS
    }

    /// Configured timeout, never above [`MAX_TRAINING_TIMEOUT_SECS`].
    pub fn effective_timeout_secs(&self) -> u64 {
        self.timeout_secs.min(MAX_TRAINING_TIMEOUT_SECS)
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            trainer: TrainerChoice::default(),
            program: Self::default_program(),
            args: Self::default_args(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}
