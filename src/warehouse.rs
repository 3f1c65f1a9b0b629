//! # Warehouse: bulk file storage
//!
//! A warehouse stores the files behind datasets and model versions. The
//! orchestration layer only needs to push files in, pull them out, and
//! produce a shell command that downloads a file from inside a container.
//!
//! ## Local Warehouse
//!
//! [`LocalWarehouse`] keeps files on the local filesystem:
//!
//! ```text
//! {root}/
//! └── datasets/
//!     └── iris/
//!         └── v1/
//!             ├── train.csv
//!             └── train.csv.sha256
//! ```
//!
//! Each file has a SHA-256 sidecar written on store and verified on fetch,
//! so a corrupted file never reaches a volume. Writes go through a unique
//! temp file followed by a rename.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Extension of digest sidecar files.
const DIGEST_EXT: &str = "sha256";

/// Location of a barrel's files inside a warehouse section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHierarchy {
    /// Warehouse section (`datasets`, `models`).
    pub section: String,
    pub parent: String,
    pub child: Option<String>,
}

impl StoreHierarchy {
    pub fn new(section: &str, parent: &str, child: Option<&str>) -> Self {
        Self {
            section: section.to_string(),
            parent: parent.to_string(),
            child: child.map(str::to_string),
        }
    }

    /// `{section}/{parent}[/{child}]`.
    pub fn as_path(&self) -> String {
        match &self.child {
            Some(child) => format!("{}/{}/{}", self.section, self.parent, child),
            None => format!("{}/{}", self.section, self.parent),
        }
    }

    /// `{section}/{parent}[/{child}]/{file_name}`.
    pub fn join_as_path(&self, file_name: &str) -> String {
        format!("{}/{}", self.as_path(), file_name)
    }
}

/// Bulk storage backend.
pub trait Warehouse: Send + Sync {
    /// Stores the file at `source` under `hierarchy` as `name`.
    fn store(&self, hierarchy: &StoreHierarchy, name: &str, source: &Path) -> Result<()>;

    /// Copies `name` from `hierarchy` into directory `dest_dir`.
    fn fetch(&self, hierarchy: &StoreHierarchy, name: &str, dest_dir: &Path) -> Result<()>;

    /// Deletes everything under `hierarchy`. Returns whether anything was removed.
    fn delete(&self, hierarchy: &StoreHierarchy, ignore: bool) -> Result<bool>;

    /// Names of the files stored under `hierarchy`.
    fn lyst(&self, hierarchy: &StoreHierarchy) -> Result<Vec<String>>;

    /// Shell command that downloads `path_from` into `path_to` from inside
    /// a container.
    fn get_download_cmd(&self, path_from: &str, path_to: &str) -> String;
}

/// Filesystem-backed warehouse with digest verification.
pub struct LocalWarehouse {
    root: PathBuf,
    public_url: Option<String>,
}

impl LocalWarehouse {
    /// Opens (creating if needed) a warehouse at `root`.
    pub fn with_path(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).map_err(|e| {
            Error::Storage(format!(
                "failed to initialize warehouse at {}: {e}",
                root.display()
            ))
        })?;

        info!("Warehouse initialized at: {}", root.display());
        Ok(Self {
            root,
            public_url: None,
        })
    }

    /// Opens the warehouse at the default location (`~/.nha/warehouse`).
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_path())
    }

    /// URL containers use to reach the warehouse root.
    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".nha").join("warehouse"))
            .unwrap_or_else(|| PathBuf::from(".nha/warehouse"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_of(&self, hierarchy: &StoreHierarchy) -> Result<PathBuf> {
        let rel = hierarchy.as_path();
        check_relative(&rel)?;
        Ok(self.root.join(rel))
    }

    fn file_of(&self, hierarchy: &StoreHierarchy, name: &str) -> Result<PathBuf> {
        check_relative(name)?;
        Ok(self.dir_of(hierarchy)?.join(name))
    }

    fn digest_of(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(DIGEST_EXT);
        path.with_file_name(name)
    }
}

impl Warehouse for LocalWarehouse {
    fn store(&self, hierarchy: &StoreHierarchy, name: &str, source: &Path) -> Result<()> {
        let path = self.file_of(hierarchy, name)?;
        let data = fs::read(source).map_err(|e| {
            Error::Storage(format!("cannot read '{}': {e}", source.display()))
        })?;
        let digest = hex::encode(Sha256::digest(&data));

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Storage(e.to_string()))?;
        }

        // Unique temp name, then rename into place.
        let temp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::now_v7()));
        fs::write(&temp_path, &data).map_err(|e| Error::Storage(e.to_string()))?;
        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::Storage(e.to_string())
        })?;
        fs::write(Self::digest_of(&path), &digest).map_err(|e| Error::Storage(e.to_string()))?;

        debug!(file = %name, hierarchy = %hierarchy.as_path(), bytes = data.len(), "Stored file");
        Ok(())
    }

    fn fetch(&self, hierarchy: &StoreHierarchy, name: &str, dest_dir: &Path) -> Result<()> {
        let path = self.file_of(hierarchy, name)?;
        let data = fs::read(&path).map_err(|_| {
            Error::Storage(format!(
                "file '{name}' not found in {}",
                hierarchy.as_path()
            ))
        })?;

        match fs::read_to_string(Self::digest_of(&path)) {
            Ok(expected) => {
                let computed = hex::encode(Sha256::digest(&data));
                if computed != expected.trim() {
                    return Err(Error::Storage(format!(
                        "digest mismatch for '{name}': expected {}, computed {computed}",
                        expected.trim()
                    )));
                }
            }
            Err(_) => warn!(file = %name, "No digest recorded, skipping verification"),
        }

        fs::create_dir_all(dest_dir)?;
        fs::write(dest_dir.join(name), &data)?;
        Ok(())
    }

    fn delete(&self, hierarchy: &StoreHierarchy, ignore: bool) -> Result<bool> {
        let dir = self.dir_of(hierarchy)?;

        if !dir.exists() {
            if ignore {
                return Ok(false);
            }
            return Err(Error::Storage(format!(
                "nothing stored under {}",
                hierarchy.as_path()
            )));
        }

        fs::remove_dir_all(&dir).map_err(|e| Error::Storage(e.to_string()))?;
        info!(hierarchy = %hierarchy.as_path(), "Purged files");
        Ok(true)
    }

    fn lyst(&self, hierarchy: &StoreHierarchy) -> Result<Vec<String>> {
        let dir = self.dir_of(hierarchy)?;

        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| Error::Storage(e.to_string()))? {
            let entry = entry.map_err(|e| Error::Storage(e.to_string()))?;
            let path = entry.path();

            if path.is_file()
                && let Some(name) = path.file_name().and_then(|n| n.to_str())
                && !name.ends_with(&format!(".{DIGEST_EXT}"))
            {
                names.push(name.to_string());
            }
        }

        names.sort();
        Ok(names)
    }

    fn get_download_cmd(&self, path_from: &str, path_to: &str) -> String {
        let url = match &self.public_url {
            Some(base) => format!("{base}/{path_from}"),
            None => format!("file://{}/{path_from}", self.root.display()),
        };

        let target = Path::new(path_to);
        let dir = target
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ".".to_string());
        let file = target
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();

        format!("curl -f -O {url} && mkdir -p {dir} && mv {file} {dir}")
    }
}

/// Rejects absolute paths and parent-directory components.
fn check_relative(path: &str) -> Result<()> {
    if path.starts_with('/') || path.split('/').any(|c| c == "..") {
        return Err(Error::Storage(format!("path traversal detected: {path}")));
    }
    Ok(())
}
