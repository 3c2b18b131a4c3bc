//! Adapter store configuration.
//!
//! Environment variables:
//! - `ACESTEP_ADAPTER_ROOT`: Root directory holding one subdirectory per adapter
//! - `ACESTEP_ADAPTER_READONLY`: Set to "true" to refuse writes
//!
//! Default root: `/loras`

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Configuration for the on-volume adapter store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraStoreConfig {
    /// Adapter root. Adapters live at `{root}/{name}/`.
    pub root: PathBuf,

    /// Read-only mode - listing and resolving only.
    /// Inference-only replicas run this way.
    #[serde(default)]
    pub read_only: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from("/loras")
}

impl Default for LoraStoreConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            read_only: false,
        }
    }
}

impl LoraStoreConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let root = env::var("ACESTEP_ADAPTER_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_root());

        let read_only = env::var("ACESTEP_ADAPTER_READONLY")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);

        Self { root, read_only }
    }

    /// Create a writable config rooted at a specific path.
    pub fn with_root(path: impl Into<PathBuf>) -> Self {
        Self {
            root: path.into(),
            read_only: false,
        }
    }

    /// Create a read-only config rooted at a specific path.
    pub fn read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            root: path.into(),
            read_only: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_root() {
        let config = LoraStoreConfig::default();
        assert_eq!(config.root, PathBuf::from("/loras"));
        assert!(!config.read_only);
    }

    #[test]
    fn test_constructors() {
        let rw = LoraStoreConfig::with_root("/tmp/a");
        assert!(!rw.read_only);

        let ro = LoraStoreConfig::read_only("/tmp/b");
        assert!(ro.read_only);
        assert_eq!(ro.root, PathBuf::from("/tmp/b"));
    }
}
