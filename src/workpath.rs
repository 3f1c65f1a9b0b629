//! Scratch directories for materializing cargo contents.

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Prefix of every scratch directory.
const WORK_PREFIX: &str = "nha-work-";

/// A temporary directory removed on drop.
#[derive(Debug)]
pub struct Workpath {
    dir: TempDir,
}

impl Workpath {
    /// Creates a fresh scratch directory under the system temp dir.
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix(WORK_PREFIX).tempdir()?;
        tracing::debug!(path = %dir.path().display(), "Created work path");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Top-level entries, sorted by name.
    pub fn entries(&self) -> Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(self.path())?
            .map(|e| e.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();
        Ok(entries)
    }

    /// Removes the directory now, reporting failures.
    pub fn dispose(self) -> Result<()> {
        self.dir.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispose_removes_directory() {
        let work = Workpath::new().unwrap();
        let path = work.path().to_path_buf();
        fs::write(work.join("a.txt"), "x").unwrap();

        assert_eq!(work.entries().unwrap().len(), 1);
        work.dispose().unwrap();
        assert!(!path.exists());
    }
}
