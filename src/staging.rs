//! Local staging area, one directory per (partition, item)
//!
//! Layout: `<root>/<partition>/<item>/<file>`. Ids are sanitized into
//! single path components; an id that needed rewriting gets a short hash
//! suffix so distinct ids never share a directory.

use std::io;
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("Failed to prepare staging directory {path}: {source}")]
    Prepare { path: PathBuf, source: io::Error },

    #[error("Failed to reclaim staging directory {path}: {source}")]
    Reclaim { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone)]
pub struct Staging {
    root: PathBuf,
}

impl Staging {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn item_dir(&self, partition: &str, item: &str) -> PathBuf {
        self.root
            .join(path_component(partition))
            .join(path_component(item))
    }

    /// Create (if needed) and return the directory for one item
    pub async fn prepare(&self, partition: &str, item: &str) -> Result<PathBuf, StagingError> {
        let path = self.item_dir(partition, item);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|source| StagingError::Prepare {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Remove an item's directory; already gone is fine
    pub async fn reclaim(&self, partition: &str, item: &str) -> Result<(), StagingError> {
        let path = self.item_dir(partition, item);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Reclaimed staging directory");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StagingError::Reclaim { path, source }),
        }
    }
}

/// Rewrite an id or file name into one safe path component.
///
/// Names made only of `[A-Za-z0-9._-]` pass through unchanged. Anything else
/// is rewritten and given a short hash of the original, placed before the
/// extension so `my clip.mp4` stays an `.mp4`.
pub fn path_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if !cleaned.is_empty() && cleaned == raw && cleaned != "." && cleaned != ".." {
        return cleaned;
    }
    let digest = Sha256::digest(raw.as_bytes());
    let suffix = &format!("{digest:x}")[..8];
    let trimmed = cleaned.trim_matches('.');
    match trimmed.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            format!("{stem}-{suffix}.{ext}")
        }
        _ => format!("{trimmed}-{suffix}"),
    }
}
