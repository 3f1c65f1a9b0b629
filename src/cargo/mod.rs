//! # Cargo: mountable volumes and their contents
//!
//! A [`Cargo`] names a volume, where it is mounted, and what must be inside
//! it before the workload starts. Captains decide how the contents get in;
//! the cargo only knows how to lay them out on a local path
//! ([`Cargo::deploy`]) or how to fetch them from inside a container
//! ([`Cargo::get_deployables`]).
//!
//! ## Naming
//!
//! Volume names are scoped per section so that workloads of different
//! kinds never share a volume by accident:
//!
//! ```text
//! name:        logs-iris
//! set_prefix:  nha-train
//! full_name:   nha-train-logs-iris
//! mount:       nha-train-logs-iris:/logs:rw
//! ```

mod content;
mod shared;

pub use content::Content;
pub use shared::{SharedLayout, Slot};

use crate::barrel::{Barrel, Deployable};
use crate::compass::is_section;
use crate::constants::{
    CONF_DIR, CONF_FILE, DEFAULT_REQUIRE_MB, LOG_DIR, META_DIR, NHA_HOME, SHARED_DATA_DIR,
    SHARED_MODEL_DIR,
};
use crate::error::{Error, Result};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Access mode of a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    ReadWrite,
    ReadOnly,
}

impl MountMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MountMode::ReadWrite => "rw",
            MountMode::ReadOnly => "ro",
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, MountMode::ReadOnly)
    }
}

impl fmt::Display for MountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of volume backs a cargo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CargoKind {
    /// Named volume populated from contents.
    Standard,
    /// Pre-allocated space, nothing to stage.
    Empty,
    /// Bind mount of an existing host or NFS path.
    Mapped { src: String, nfs: bool },
    /// Named volume collecting workload logs.
    Logs,
    /// Barrel-backed bulk data.
    Heavy,
    /// Several cargos merged under one mount point.
    Shared(SharedLayout),
}

/// A named, mountable volume plus the ordered contents that populate it.
#[derive(Debug, Clone)]
pub struct Cargo {
    name: String,
    mount_to: String,
    mode: MountMode,
    contents: Vec<Content>,
    prefix: Option<String>,
    require_mb: u64,
    kind: CargoKind,
}

impl Cargo {
    /// A standard cargo holding `contents`.
    pub fn new(
        name: impl Into<String>,
        mount_to: impl Into<String>,
        mode: MountMode,
        contents: Vec<Content>,
    ) -> Self {
        Self {
            name: name.into(),
            mount_to: mount_to.into(),
            mode,
            contents,
            prefix: None,
            require_mb: DEFAULT_REQUIRE_MB,
            kind: CargoKind::Standard,
        }
    }

    /// Pre-allocated read-write space.
    pub fn empty(name: impl Into<String>, mount_to: impl Into<String>, require_mb: u64) -> Self {
        Self {
            require_mb,
            kind: CargoKind::Empty,
            ..Self::new(name, mount_to, MountMode::ReadWrite, Vec::new())
        }
    }

    /// Bind mount of `src`, optionally on the NFS server.
    pub fn mapped(
        name: impl Into<String>,
        mount_to: impl Into<String>,
        src: impl Into<String>,
        nfs: bool,
    ) -> Self {
        Self {
            kind: CargoKind::Mapped {
                src: src.into(),
                nfs,
            },
            ..Self::new(name, mount_to, MountMode::ReadWrite, Vec::new())
        }
    }

    /// Log volume of a workload.
    pub fn logs(suffix: &str) -> Self {
        Self {
            kind: CargoKind::Logs,
            ..Self::new(format!("logs-{suffix}"), LOG_DIR, MountMode::ReadWrite, Vec::new())
        }
    }

    /// Read-only configuration volume holding the configuration dump.
    pub fn conf(suffix: &str, dump: impl Into<String>) -> Self {
        Self::new(
            format!("conf-{suffix}"),
            CONF_DIR,
            MountMode::ReadOnly,
            vec![Content::literal(CONF_FILE, dump)],
        )
    }

    /// Read-only metadata volume, one file per `(file_name, text)` document.
    pub fn meta(suffix: &str, docs: Vec<(String, String)>) -> Self {
        Self::new(
            format!("metadata-{suffix}"),
            META_DIR,
            MountMode::ReadOnly,
            docs.into_iter()
                .map(|(file_name, text)| Content::literal(file_name, text))
                .collect(),
        )
    }

    /// Scratch volume with a unique generated name.
    pub fn anonymous(mount_to: impl Into<String>, mode: MountMode) -> Self {
        let alias = uuid::Uuid::new_v4().simple().to_string();
        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");

        Self::new(format!("anon-{}-{stamp}", &alias[..8]), mount_to, mode, Vec::new())
    }

    /// Barrel-backed cargo sized from the barrel's estimate.
    pub fn heavy(
        name: impl Into<String>,
        mount_to: impl Into<String>,
        mode: MountMode,
        barrel: Arc<Barrel>,
    ) -> Self {
        let content = Content::Barrel(barrel);
        let require_mb = content.estimate_mb();

        Self {
            require_mb,
            kind: CargoKind::Heavy,
            ..Self::new(name, mount_to, mode, vec![content])
        }
    }

    /// Read-only dataset files.
    pub fn dataset(model: &str, dataset: &str, barrel: Arc<Barrel>) -> Self {
        Self::heavy(
            format!("dataset-{model}-{dataset}"),
            SHARED_DATA_DIR,
            MountMode::ReadOnly,
            barrel,
        )
    }

    /// Model version files, writable so trainings can produce them.
    pub fn movers(model: &str, version: &str, barrel: Arc<Barrel>) -> Self {
        Self::heavy(
            format!("movers-{model}-{version}"),
            SHARED_MODEL_DIR,
            MountMode::ReadWrite,
            barrel,
        )
    }

    /// Merges `cargos` into one volume mounted at the framework home.
    ///
    /// Each source lands in the subdirectory given by its mount path
    /// relative to the home. Sources mounted elsewhere are rejected.
    pub fn shared(name: &str, cargos: Vec<Cargo>) -> Result<Self> {
        let mut layout = SharedLayout::default();
        let mut contents = Vec::new();

        for cargo in cargos {
            let subdir = relative_to_home(&cargo.mount_to)?;
            let heavy = matches!(cargo.kind, CargoKind::Heavy);

            layout.push(subdir, heavy, cargo.contents.len());
            contents.extend(cargo.contents);
        }

        let require_mb = contents
            .iter()
            .map(Content::estimate_mb)
            .sum::<u64>()
            .max(DEFAULT_REQUIRE_MB);

        Ok(Self {
            require_mb,
            kind: CargoKind::Shared(layout),
            ..Self::new(format!("shared-{name}"), NHA_HOME, MountMode::ReadWrite, contents)
        })
    }

    /// Scopes the volume name to `section`. Allowed once.
    pub fn set_prefix(&mut self, section: &str) -> Result<()> {
        if let Some(prefix) = &self.prefix {
            return Err(Error::Misusage(format!(
                "cargo '{}' already has prefix '{prefix}'",
                self.name
            )));
        }

        if !is_section(section) {
            return Err(Error::Misusage(format!(
                "cannot prefix cargo '{}' with unknown section '{section}'",
                self.name
            )));
        }

        self.prefix = Some(section.to_string());
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Volume name: `{prefix}-{name}`, without a leading dash.
    pub fn full_name(&self) -> String {
        format!("{}-{}", self.prefix.as_deref().unwrap_or(""), self.name)
            .trim_start_matches('-')
            .to_string()
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn mount_to(&self) -> &str {
        &self.mount_to
    }

    pub fn mode(&self) -> MountMode {
        self.mode
    }

    pub fn contents(&self) -> &[Content] {
        &self.contents
    }

    pub fn require_mb(&self) -> u64 {
        self.require_mb
    }

    pub fn kind(&self) -> &CargoKind {
        &self.kind
    }

    pub fn is_empty_kind(&self) -> bool {
        matches!(self.kind, CargoKind::Empty)
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.kind, CargoKind::Mapped { .. })
    }

    pub fn is_logs(&self) -> bool {
        matches!(self.kind, CargoKind::Logs)
    }

    /// Heavy cargos and shared cargos carrying heavy content.
    pub fn stages_in_container(&self) -> bool {
        match &self.kind {
            CargoKind::Heavy => true,
            CargoKind::Shared(layout) => layout.has_heavy(),
            _ => false,
        }
    }

    /// What gets mounted: the source path of a mapped cargo, the volume
    /// name otherwise.
    pub fn volume(&self) -> String {
        match &self.kind {
            CargoKind::Mapped { src, .. } => src.clone(),
            _ => self.full_name(),
        }
    }

    /// Mount descriptor: `{volume}:{mount_to}:{mode}`.
    pub fn mount(&self) -> String {
        format!("{}:{}:{}", self.volume(), self.mount_to, self.mode)
    }

    // =========================================================================
    // Staging
    // =========================================================================

    /// Lays out the contents under `path`.
    ///
    /// Heavy content of a shared cargo is only included on request.
    pub fn deploy(&self, path: &Path, include_heavy: bool) -> Result<()> {
        match &self.kind {
            CargoKind::Shared(layout) => layout.deploy(&self.contents, path, include_heavy),
            _ => {
                for content in &self.contents {
                    content.deploy(path)?;
                }
                Ok(())
            }
        }
    }

    /// Commands that stage heavy content from inside a container mounting
    /// this cargo at `path`.
    pub fn get_deployables(&self, path: &str) -> Result<Vec<Deployable>> {
        match &self.kind {
            CargoKind::Shared(layout) => layout.get_deployables(&self.contents, path),
            CargoKind::Heavy => {
                let mut deployables = Vec::new();
                for content in &self.contents {
                    deployables.extend(content.get_deployables(path)?);
                }
                Ok(deployables)
            }
            _ => Ok(Vec::new()),
        }
    }
}

fn relative_to_home(mount_to: &str) -> Result<&str> {
    if mount_to == NHA_HOME {
        return Ok("");
    }

    mount_to
        .strip_prefix(NHA_HOME)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| {
            Error::Configuration(format!(
                "cannot share a cargo mounted outside {NHA_HOME}: {mount_to}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name_without_prefix() {
        let cargo = Cargo::logs("iris");
        assert_eq!(cargo.full_name(), "logs-iris");
    }

    #[test]
    fn test_relative_to_home() {
        assert_eq!(relative_to_home("/nha/conf").unwrap(), "conf");
        assert_eq!(relative_to_home("/nha").unwrap(), "");
        assert!(relative_to_home("/nhax/conf").is_err());
        assert!(relative_to_home("/logs").is_err());
    }
}
