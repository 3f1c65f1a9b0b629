//! # Barrels: schema-checked bundles of bulk files
//!
//! A barrel is the set of files behind a dataset or a model version. It
//! knows its schema (which files exist, which are required, how big they
//! may get), where it lives in the warehouse, and whether it is stored as a
//! single compressed archive.
//!
//! Barrels reach a volume in one of two ways:
//!
//! 1. [`Barrel::deploy`] downloads the files to a local directory, which the
//!    captain then copies into the volume.
//! 2. [`Barrel::get_deployables`] yields shell commands that download the
//!    files from inside the helper container, so bulk data never passes
//!    through the operator's machine.

use crate::constants::DEFAULT_FILE_MB;
use crate::error::{Error, Result};
use crate::warehouse::{StoreHierarchy, Warehouse};
use crate::workpath::Workpath;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::path::{Component, Path};
use std::sync::Arc;
use tar::Archive;
use tracing::{debug, info, warn};

/// Warehouse section for datasets.
pub const DATASETS: &str = "datasets";

/// Warehouse section for model versions.
pub const MODELS: &str = "models";

/// A (message, shell command) pair executed inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployable {
    pub message: String,
    pub command: String,
}

impl Deployable {
    pub fn new(message: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            command: command.into(),
        }
    }
}

/// One file in a barrel's schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    /// Name inside the barrel.
    pub name: String,
    /// Name on the source path, if different.
    pub alias: Option<String>,
    pub required: bool,
    pub max_mb: Option<u64>,
}

impl FileSpec {
    /// An optional file with no size bound.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            required: false,
            max_mb: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_max_mb(mut self, max_mb: u64) -> Self {
        self.max_mb = Some(max_mb);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    fn source_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Bulk files for a dataset or a model version.
pub struct Barrel {
    subject: String,
    hierarchy: StoreHierarchy,
    schema: Vec<FileSpec>,
    compressed: Option<String>,
    warehouse: Arc<dyn Warehouse>,
}

impl Barrel {
    /// Creates a barrel.
    ///
    /// `compress_to` stores the files as a single `{compress_to}.tar.gz`.
    pub fn new(
        subject: impl Into<String>,
        hierarchy: StoreHierarchy,
        schema: Vec<FileSpec>,
        compress_to: Option<&str>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        Self {
            subject: subject.into(),
            hierarchy,
            schema,
            compressed: compress_to.map(|c| format!("{c}.tar.gz")),
            warehouse,
        }
    }

    /// Barrel of a dataset, stored under `datasets/{model}/{dataset}`.
    pub fn dataset(
        model: &str,
        dataset: &str,
        schema: Vec<FileSpec>,
        compressed: bool,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        Self::new(
            format!("dataset '{model}:{dataset}'"),
            StoreHierarchy::new(DATASETS, model, Some(dataset)),
            schema,
            compressed.then_some(dataset),
            warehouse,
        )
    }

    /// Barrel of a model version, stored under `models/{model}/{version}`.
    pub fn movers(
        model: &str,
        version: &str,
        schema: Vec<FileSpec>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        Self::new(
            format!("model version '{model}:{version}'"),
            StoreHierarchy::new(MODELS, model, Some(version)),
            schema,
            None,
            warehouse,
        )
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn schema(&self) -> &[FileSpec] {
        &self.schema
    }

    pub fn hierarchy(&self) -> &StoreHierarchy {
        &self.hierarchy
    }

    /// Name of the archive, when compressed.
    pub fn compressed(&self) -> Option<&str> {
        self.compressed.as_deref()
    }

    /// Size hint for volume sizing: Σ(max_mb or 10).
    pub fn estimate_mb(&self) -> u64 {
        self.schema
            .iter()
            .map(|f| f.max_mb.unwrap_or(DEFAULT_FILE_MB))
            .sum()
    }

    // =========================================================================
    // Storing
    // =========================================================================

    /// Uploads the barrel's files from a local directory.
    ///
    /// Missing required files fail with a storage error naming the file;
    /// missing optional files are skipped.
    pub fn store_from_path(&self, path: &Path) -> Result<()> {
        if !path.is_dir() {
            return Err(Error::Storage(format!(
                "path not found: {}",
                path.display()
            )));
        }

        let schema = self.infer_schema_from_path(path)?;
        let mut present = Vec::new();

        for spec in &schema {
            let file_path = path.join(spec.source_name());

            if file_path.is_file() {
                present.push(spec.clone());
            } else if spec.required {
                return Err(Error::Storage(format!(
                    "File '{}' not found in path: {}",
                    spec.name,
                    path.display()
                )));
            } else {
                info!(file = %spec.name, "Ignoring absent file");
            }
        }

        match &self.compressed {
            Some(archive) => self.compress_and_store(path, archive, &present),
            None => {
                for spec in &present {
                    let file_path = path.join(spec.source_name());
                    check_size(spec, &file_path)?;
                    self.warehouse.store(&self.hierarchy, &spec.name, &file_path)?;
                }
                Ok(())
            }
        }
    }

    fn infer_schema_from_path(&self, path: &Path) -> Result<Vec<FileSpec>> {
        if !self.schema.is_empty() {
            return Ok(self.schema.clone());
        }

        let mut schema = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if entry.path().is_file() {
                schema.push(FileSpec::new(entry.file_name().to_string_lossy()));
            }
        }
        schema.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(schema)
    }

    fn compress_and_store(&self, path: &Path, archive: &str, files: &[FileSpec]) -> Result<()> {
        let work = Workpath::new()?;
        let target = work.join(archive);

        {
            let file = File::create(&target)?;
            let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

            for spec in files {
                builder.append_path_with_name(path.join(spec.source_name()), &spec.name)?;
            }

            builder.into_inner()?.finish()?;
        }

        debug!(archive = %archive, files = files.len(), "Compressed barrel");
        self.warehouse.store(&self.hierarchy, archive, &target)?;
        work.dispose()
    }

    /// Removes every stored file of this barrel.
    pub fn purge(&self, ignore: bool) -> Result<bool> {
        self.warehouse.delete(&self.hierarchy, ignore)
    }

    // =========================================================================
    // Deploying
    // =========================================================================

    fn stored_files(&self) -> Result<Vec<String>> {
        if let Some(archive) = &self.compressed {
            return Ok(vec![archive.clone()]);
        }

        if self.schema.is_empty() {
            warn!(subject = %self.subject, "Deploying without a strict definition of files");
            return self.warehouse.lyst(&self.hierarchy);
        }

        Ok(self.schema.iter().map(|f| f.name.clone()).collect())
    }

    /// Downloads the barrel into `path_to`, extracting archives and checking
    /// that every required file arrived.
    pub fn deploy(&self, path_to: &Path) -> Result<()> {
        let required: Vec<&FileSpec> = self.schema.iter().filter(|f| f.required).collect();

        for name in self.stored_files()? {
            let optional = self.compressed.is_none()
                && !required.iter().any(|f| f.name == name)
                && !self.schema.is_empty();

            match self.warehouse.fetch(&self.hierarchy, &name, path_to) {
                Ok(()) => {}
                Err(e) if optional => {
                    debug!(file = %name, error = %e, "Optional file not available");
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(archive) = &self.compressed {
            extract_archive(&path_to.join(archive), path_to)?;
            fs::remove_file(path_to.join(archive))?;
        }

        for spec in required {
            if !path_to.join(&spec.name).is_file() {
                return Err(Error::Storage(format!(
                    "Required file '{}' is missing from {}",
                    spec.name, self.subject
                )));
            }
        }

        Ok(())
    }

    /// Commands that deploy the barrel from inside a container.
    pub fn get_deployables(&self, path_to: &str) -> Result<Vec<Deployable>> {
        let mut deployables: Vec<Deployable> = self
            .stored_files()?
            .into_iter()
            .map(|name| {
                let cmd = self.warehouse.get_download_cmd(
                    &self.hierarchy.join_as_path(&name),
                    &format!("{path_to}/{name}"),
                );
                Deployable::new(format!("Injecting file: {name}"), cmd)
            })
            .collect();

        if let Some(archive) = &self.compressed {
            deployables.push(Deployable::new(
                format!("Extracting {archive} to {path_to}"),
                format!("tar -xzf {path_to}/{archive} -C {path_to} && rm -f {path_to}/{archive}"),
            ));
        }

        Ok(deployables)
    }
}

fn check_size(spec: &FileSpec, path: &Path) -> Result<()> {
    let Some(max_mb) = spec.max_mb else {
        return Ok(());
    };

    let size_mb = fs::metadata(path)?.len() / (1024 * 1024);
    if size_mb > max_mb {
        return Err(Error::Storage(format!(
            "File {} is too large: {} MB",
            spec.name, size_mb
        )));
    }
    Ok(())
}

/// Extracts a `.tar.gz` into `dest`, rejecting entries that escape it.
fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut tar = Archive::new(GzDecoder::new(file));

    for entry in tar
        .entries()
        .map_err(|e| Error::Storage(format!("corrupt archive: {e}")))?
    {
        let mut entry = entry.map_err(|e| Error::Storage(format!("corrupt archive: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| Error::Storage(format!("corrupt archive: {e}")))?;

        let escapes = path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        if escapes {
            return Err(Error::Storage(format!(
                "path traversal detected in archive: {}",
                path.display()
            )));
        }

        entry
            .unpack_in(dest)
            .map_err(|e| Error::Storage(format!("failed to extract archive: {e}")))?;
    }

    Ok(())
}
