//! Per-request scratch files.
//!
//! A [`ScratchDir`] owns a fresh directory under the configured scratch root
//! and every file it hands out. Dropping it deletes them, on success and
//! error paths alike. Deletion failures are logged at debug and never
//! reported to the caller.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

pub struct ScratchDir {
    dir: TempDir,
    issued: Vec<PathBuf>,
}

impl ScratchDir {
    /// Create a request-scoped directory inside `root`, creating `root` if needed.
    pub fn new_in(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("failed to create scratch root {}", root.display()))?;

        let dir = tempfile::Builder::new()
            .prefix("req_")
            .tempdir_in(root)
            .with_context(|| format!("failed to create scratch dir in {}", root.display()))?;

        Ok(Self {
            dir,
            issued: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `bytes` to a new file named `{prefix}_{uuid}.{ext}`.
    pub fn write(&mut self, bytes: &[u8], prefix: &str, ext: &str) -> Result<PathBuf> {
        let name = format!("{}_{}.{}", prefix, uuid::Uuid::new_v4().simple(), ext);
        let path = self.dir.path().join(name);

        fs::write(&path, bytes)
            .with_context(|| format!("failed to write scratch file {}", path.display()))?;

        tracing::debug!(path = %path.display(), size = bytes.len(), "wrote scratch file");
        self.issued.push(path.clone());
        Ok(path)
    }

    /// Take ownership of a file created by someone else, e.g. a model output.
    pub fn adopt(&mut self, path: impl Into<PathBuf>) {
        self.issued.push(path.into());
    }

    pub fn issued(&self) -> &[PathBuf] {
        &self.issued
    }

    /// Delete every issued file. Missing files are fine.
    pub fn release_all(&mut self) {
        for path in self.issued.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "scratch cleanup failed");
                }
            }
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_names_and_tracks() -> Result<()> {
        let root = tempfile::TempDir::new()?;
        let mut scratch = ScratchDir::new_in(root.path())?;

        let path = scratch.write(b"RIFF", "src", "wav")?;
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(name.starts_with("src_"));
        assert!(name.ends_with(".wav"));
        assert_eq!(name.len(), "src_".len() + 32 + ".wav".len());
        assert_eq!(scratch.issued(), &[path.clone()]);
        assert_eq!(fs::read(&path)?, b"RIFF");
        Ok(())
    }

    #[test]
    fn test_release_tolerates_missing_files() -> Result<()> {
        let root = tempfile::TempDir::new()?;
        let mut scratch = ScratchDir::new_in(root.path())?;

        let a = scratch.write(b"a", "ref", "wav")?;
        let b = scratch.write(b"b", "ref", "wav")?;
        fs::remove_file(&a)?;

        scratch.release_all();
        assert!(!b.exists());
        assert!(scratch.issued().is_empty());
        Ok(())
    }

    #[test]
    fn test_drop_removes_adopted_files_and_dir() -> Result<()> {
        let root = tempfile::TempDir::new()?;
        let outside = root.path().join("output_0.mp3");
        fs::write(&outside, b"ID3")?;

        let dir_path;
        {
            let mut scratch = ScratchDir::new_in(root.path())?;
            dir_path = scratch.path().to_path_buf();
            scratch.write(b"x", "src", "wav")?;
            scratch.adopt(&outside);
        }

        assert!(!outside.exists());
        assert!(!dir_path.exists());
        Ok(())
    }

    #[test]
    fn test_creates_missing_root() -> Result<()> {
        let root = tempfile::TempDir::new()?;
        let nested = root.path().join("acestep_audio");
        let scratch = ScratchDir::new_in(&nested)?;
        assert!(scratch.path().starts_with(&nested));
        Ok(())
    }
}
