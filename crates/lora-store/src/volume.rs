//! Volume coherence hooks.
//!
//! The adapter root may be a network volume written by other processes. A
//! [`Volume`] refreshes the local view before reads and publishes local writes
//! after a training run. Readers accept eventual consistency; nothing here
//! locks.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};

/// Refresh/commit hooks around the adapter root.
pub trait Volume: Send + Sync {
    /// Pull the latest state before a read.
    fn reload(&self) -> Result<()>;

    /// Publish local writes so other processes can see them.
    fn commit(&self) -> Result<()>;
}

/// A plain local directory. Reload and commit have nothing to do.
#[derive(Debug, Clone)]
pub struct LocalVolume {
    root: PathBuf,
}

impl LocalVolume {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Volume for LocalVolume {
    fn reload(&self) -> Result<()> {
        tracing::trace!(root = %self.root.display(), "local volume reload");
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        tracing::trace!(root = %self.root.display(), "local volume commit");
        Ok(())
    }
}

/// Runs external commands to reload and commit, e.g. a sync tool for a
/// mounted bucket. Either hook may be absent.
#[derive(Debug, Clone, Default)]
pub struct CommandVolume {
    reload_command: Option<Vec<String>>,
    commit_command: Option<Vec<String>>,
}

impl CommandVolume {
    pub fn new(reload_command: Option<Vec<String>>, commit_command: Option<Vec<String>>) -> Self {
        Self {
            reload_command,
            commit_command,
        }
    }

    fn run(argv: &[String], what: &str) -> Result<()> {
        let Some((program, args)) = argv.split_first() else {
            return Ok(());
        };

        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to run volume {} command '{}'", what, program))?;

        if !output.status.success() {
            anyhow::bail!(
                "volume {} command '{}' exited with {}: {}",
                what,
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        tracing::debug!(command = %program, "volume {} complete", what);
        Ok(())
    }
}

impl Volume for CommandVolume {
    fn reload(&self) -> Result<()> {
        match &self.reload_command {
            Some(argv) => Self::run(argv, "reload"),
            None => Ok(()),
        }
    }

    fn commit(&self) -> Result<()> {
        match &self.commit_command {
            Some(argv) => Self::run(argv, "commit"),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_volume_is_noop() {
        let volume = LocalVolume::new("/does/not/matter");
        assert!(volume.reload().is_ok());
        assert!(volume.commit().is_ok());
    }

    #[test]
    fn test_command_volume_without_hooks() {
        let volume = CommandVolume::default();
        assert!(volume.reload().is_ok());
        assert!(volume.commit().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_volume_runs_hooks() {
        let volume = CommandVolume::new(
            Some(vec!["true".to_string()]),
            Some(vec!["sh".to_string(), "-c".to_string(), "echo nope >&2; exit 2".to_string()]),
        );
        assert!(volume.reload().is_ok());

        let err = volume.commit().unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let volume = CommandVolume::new(Some(vec!["definitely-not-a-real-binary-7f3a".to_string()]), None);
        assert!(volume.reload().is_err());
    }
}
