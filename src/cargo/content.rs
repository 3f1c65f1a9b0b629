//! Materials that populate a cargo.

use crate::barrel::{Barrel, Deployable};
use crate::error::Result;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// One unit of cargo content.
#[derive(Clone)]
pub enum Content {
    /// Inline text written to `file_name`.
    Literal { file_name: String, text: String },
    /// Inline bytes written to `file_name`.
    Binary { file_name: String, bytes: Vec<u8> },
    /// Bulk files held by a barrel.
    Barrel(Arc<Barrel>),
}

impl Content {
    pub fn literal(file_name: impl Into<String>, text: impl Into<String>) -> Self {
        Content::Literal {
            file_name: file_name.into(),
            text: text.into(),
        }
    }

    pub fn binary(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Content::Binary {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// Returns true for barrel-backed content.
    pub fn is_heavy(&self) -> bool {
        matches!(self, Content::Barrel(_))
    }

    /// Materializes the content inside directory `path`.
    pub fn deploy(&self, path: &Path) -> Result<()> {
        match self {
            Content::Literal { file_name, text } => fs::write(path.join(file_name), text)?,
            Content::Binary { file_name, bytes } => fs::write(path.join(file_name), bytes)?,
            Content::Barrel(barrel) => barrel.deploy(path)?,
        }
        Ok(())
    }

    /// In-container staging commands. Inline content has none.
    pub fn get_deployables(&self, path: &str) -> Result<Vec<Deployable>> {
        match self {
            Content::Barrel(barrel) => barrel.get_deployables(path),
            _ => Ok(Vec::new()),
        }
    }

    /// Size hint in MB, rounded up.
    pub fn estimate_mb(&self) -> u64 {
        match self {
            Content::Literal { text, .. } => bytes_to_mb(text.len()),
            Content::Binary { bytes, .. } => bytes_to_mb(bytes.len()),
            Content::Barrel(barrel) => barrel.estimate_mb(),
        }
    }
}

impl std::fmt::Debug for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Content::Literal { file_name, text } => f
                .debug_struct("Literal")
                .field("file_name", file_name)
                .field("len", &text.len())
                .finish(),
            Content::Binary { file_name, bytes } => f
                .debug_struct("Binary")
                .field("file_name", file_name)
                .field("len", &bytes.len())
                .finish(),
            Content::Barrel(barrel) => f.debug_tuple("Barrel").field(&barrel.subject()).finish(),
        }
    }
}

fn bytes_to_mb(len: usize) -> u64 {
    (len / 1024 / 1024) as u64 + 1
}
