//! Local directory source, used for watch roots on mounted storage.

use std::fs::Metadata;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, info};

use super::traits::{SourceAdapter, SourceError};
use crate::model::ItemDescriptor;

/// Enumerates regular files below a root directory.
///
/// Item ids are paths relative to the root (always `/`-separated). The
/// position marker is the zero-padded time in milliseconds at which the file
/// last changed or arrived: the later of its mtime and its inode change time,
/// so a file moved in with an old mtime (`mv`, `cp -p`, `rsync -t`) still
/// sorts after the cursor.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    name: String,
    root: PathBuf,
    extensions: Vec<String>,
    recursive: bool,
}

impl DirectorySource {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            extensions: Vec::new(),
            recursive: false,
        }
    }

    /// Only report files with one of these extensions (case-insensitive)
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    fn accepts(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .is_some_and(|ext| self.extensions.contains(&ext))
    }

    fn scan(&self, cursor: Option<&str>) -> io::Result<Vec<ItemDescriptor>> {
        let mut items = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let file_type = entry.file_type()?;
                let path = entry.path();

                if file_type.is_dir() {
                    if self.recursive {
                        pending.push(path);
                    }
                    continue;
                }
                if !file_type.is_file() || !self.accepts(&path) {
                    continue;
                }

                let metadata = entry.metadata()?;
                let position = format!("{:020}", arrival_ms(&metadata));
                if cursor.is_some_and(|c| position.as_str() < c) {
                    continue;
                }

                let Some(id) = relative_id(&self.root, &path) else {
                    continue;
                };
                let name = entry.file_name().to_string_lossy().into_owned();
                items.push(
                    ItemDescriptor::builder()
                        .id(id)
                        .name(name)
                        .size(metadata.len())
                        .position(position)
                        .build(),
                );
            }
        }

        items.sort_by(|a, b| (&a.position, &a.id).cmp(&(&b.position, &b.id)));
        Ok(items)
    }
}

fn millis(time: io::Result<SystemTime>) -> u128 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_millis())
}

#[cfg(unix)]
fn arrival_ms(metadata: &Metadata) -> u128 {
    use std::os::unix::fs::MetadataExt;

    let changed = u128::try_from(metadata.ctime()).unwrap_or(0) * 1000
        + u128::try_from(metadata.ctime_nsec()).unwrap_or(0) / 1_000_000;
    millis(metadata.modified()).max(changed)
}

// Copies get a fresh creation time here
#[cfg(not(unix))]
fn arrival_ms(metadata: &Metadata) -> u128 {
    millis(metadata.modified()).max(millis(metadata.created()))
}

fn relative_id(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

fn classify_io(context: &str, err: io::Error) -> SourceError {
    match err.kind() {
        io::ErrorKind::NotFound => SourceError::NotFound(format!("{context}: {err}")),
        io::ErrorKind::PermissionDenied => SourceError::AuthFailed(format!("{context}: {err}")),
        _ => SourceError::Unavailable(format!("{context}: {err}")),
    }
}

#[async_trait]
impl SourceAdapter for DirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enumerate(&self, cursor: Option<&str>) -> Result<Vec<ItemDescriptor>, SourceError> {
        let this = self.clone();
        let cursor = cursor.map(str::to_owned);
        let items = tokio::task::spawn_blocking(move || this.scan(cursor.as_deref()))
            .await
            .map_err(|e| SourceError::Unavailable(format!("scan task failed: {e}")))?
            .map_err(|e| match e.kind() {
                // An unmounted or not-yet-created root is expected to come back
                io::ErrorKind::NotFound => {
                    SourceError::Unavailable(format!("{}: {e}", self.root.display()))
                }
                _ => classify_io(&self.root.display().to_string(), e),
            })?;

        debug!(source = %self.name, count = items.len(), "Directory enumerated");
        Ok(items)
    }

    async fn fetch(
        &self,
        item: &ItemDescriptor,
        staging_dir: &Path,
    ) -> Result<PathBuf, SourceError> {
        let relative = Path::new(&item.id);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(SourceError::Rejected(format!(
                "item id escapes the source root: {}",
                item.id
            )));
        }

        let source_path = self.root.join(relative);
        let target = staging_dir.join(&item.name);
        let copied = tokio::fs::copy(&source_path, &target)
            .await
            .map_err(|e| classify_io(&source_path.display().to_string(), e))?;

        info!(source = %self.name, item = %item.id, bytes = copied, "Copied item to staging");
        Ok(target)
    }
}
