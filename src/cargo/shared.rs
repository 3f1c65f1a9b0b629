//! Layout of a shared cargo: many sources merged under one mount point.
//!
//! ```text
//! /nha                      (shared mount)
//! ├── conf/nha.yaml         <- conf cargo, lightweight
//! ├── meta/*.json           <- meta cargo, lightweight
//! └── data/train.csv        <- dataset cargo, heavy (staged in-container)
//! ```

use super::Content;
use crate::barrel::Deployable;
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Placement of one content inside the shared mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Directory relative to the shared mount point.
    pub subdir: String,
    /// Content came from a heavy cargo.
    pub heavy: bool,
}

/// Per-content placement, aligned index by index with the cargo's contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedLayout {
    slots: Vec<Slot>,
}

impl SharedLayout {
    pub(super) fn push(&mut self, subdir: &str, heavy: bool, count: usize) {
        self.slots.extend((0..count).map(|_| Slot {
            subdir: subdir.to_string(),
            heavy,
        }));
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Returns true if any slot is staged in-container.
    pub fn has_heavy(&self) -> bool {
        self.slots.iter().any(|s| s.heavy)
    }

    pub(super) fn deploy(&self, contents: &[Content], path: &Path, include_heavy: bool) -> Result<()> {
        for (slot, content) in self.slots.iter().zip(contents) {
            if slot.heavy && !include_heavy {
                continue;
            }

            let subpath = path.join(&slot.subdir);

            if subpath.exists() {
                if !subpath.is_dir() {
                    return Err(Error::Configuration(format!(
                        "expected path '{}' to be a directory, not a file",
                        subpath.display()
                    )));
                }
            } else {
                fs::create_dir_all(&subpath)?;
            }

            content.deploy(&subpath)?;
        }

        Ok(())
    }

    pub(super) fn get_deployables(&self, contents: &[Content], path: &str) -> Result<Vec<Deployable>> {
        let mut deployables = Vec::new();

        for (slot, content) in self.slots.iter().zip(contents) {
            if !slot.heavy {
                continue;
            }

            let subpath = if slot.subdir.is_empty() {
                path.to_string()
            } else {
                format!("{}/{}", path.trim_end_matches('/'), slot.subdir)
            };

            deployables.extend(content.get_deployables(&subpath)?);
        }

        Ok(deployables)
    }
}
