//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem locations used by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the shared adapter volume. One directory per LoRA.
    /// Default: /loras
    #[serde(default = "PathsConfig::default_adapter_root")]
    pub adapter_root: PathBuf,

    /// Parent directory for per-request scratch directories.
    /// Default: /tmp/acestep_audio
    #[serde(default = "PathsConfig::default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Checkout of the ACE-Step project the worker runs from.
    /// Default: /opt/ACE-Step
    #[serde(default = "PathsConfig::default_project_root")]
    pub project_root: PathBuf,

    /// Pre-downloaded model weights. Falls back to `<project_root>/checkpoints`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_dir: Option<PathBuf>,
}

impl PathsConfig {
    fn default_adapter_root() -> PathBuf {
        PathBuf::from("/loras")
    }

    fn default_scratch_dir() -> PathBuf {
        PathBuf::from("/tmp/acestep_audio")
    }

    fn default_project_root() -> PathBuf {
        PathBuf::from("/opt/ACE-Step")
    }

    /// Effective checkpoint directory.
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.checkpoint_dir
            .clone()
            .unwrap_or_else(|| self.project_root.join("checkpoints"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            adapter_root: Self::default_adapter_root(),
            scratch_dir: Self::default_scratch_dir(),
            project_root: Self::default_project_root(),
            checkpoint_dir: None,
        }
    }
}

/// Network bind address for the HTTP surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindConfig {
    /// Default: 0.0.0.0
    #[serde(default = "BindConfig::default_http_host")]
    pub http_host: String,

    /// Default: 8000
    #[serde(default = "BindConfig::default_http_port")]
    pub http_port: u16,

    /// Largest accepted request body in MiB. Base64 audio uploads land here.
    /// Default: 64
    #[serde(default = "BindConfig::default_max_body_mb")]
    pub max_body_mb: usize,
}

impl BindConfig {
    fn default_http_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_http_port() -> u16 {
        8000
    }

    fn default_max_body_mb() -> usize {
        64
    }

    /// Request body cap in bytes.
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_mb.saturating_mul(1024 * 1024)
    }

    /// `host:port` string suitable for a listener.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            http_host: Self::default_http_host(),
            http_port: Self::default_http_port(),
            max_body_mb: Self::default_max_body_mb(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint for OpenTelemetry. Empty disables export.
    /// Default: "" (stdout logging only)
    #[serde(default)]
    pub otlp_endpoint: String,

    /// Log filter directive (trace, debug, info, warn, error or an EnvFilter string).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    pub fn otlp_enabled(&self) -> bool {
        !self.otlp_endpoint.trim().is_empty()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: String::new(),
            log_level: Self::default_log_level(),
        }
    }
}

/// Hooks for keeping the adapter volume coherent across processes.
///
/// Each command is an argv list executed without a shell. When unset the
/// adapter root is treated as a plain local directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Run before every read of the adapter root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reload_command: Option<Vec<String>>,

    /// Run after a training run has written its outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_command: Option<Vec<String>>,
}

/// All infrastructure settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub volume: VolumeConfig,
}
