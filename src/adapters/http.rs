//! HTTP source over a configured list of URLs (e.g. an exported playlist)

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::traits::{SourceAdapter, SourceError};
use crate::model::ItemDescriptor;
use crate::staging::path_component;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(3600),
            user_agent: "relaybox/0.1.0".to_string(),
        }
    }
}

/// One configured download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpItem {
    pub id: Option<String>,
    pub url: String,
    pub name: Option<String>,
}

impl HttpItem {
    fn descriptor(&self) -> ItemDescriptor {
        let id = self.id.clone().unwrap_or_else(|| derive_id(&self.url));
        let name = self
            .name
            .clone()
            .or_else(|| last_segment(&self.url))
            .unwrap_or_else(|| id.clone());
        ItemDescriptor::builder()
            .id(id)
            .name(name)
            .locator(self.url.clone())
            .build()
    }
}

/// Stable id for a URL without an explicit one
fn derive_id(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("{digest:x}")[..16].to_string()
}

fn last_segment(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next()?;
    without_query
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
        .map(str::to_owned)
}

/// Final and in-progress paths for a download. Names come from config or
/// URLs, so they are reduced to a single safe component first.
fn staged_paths(staging_dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    let file_name = path_component(name);
    let partial = staging_dir.join(format!("{file_name}.part"));
    (staging_dir.join(file_name), partial)
}

/// Downloads a fixed list of URLs
pub struct HttpSource {
    name: String,
    client: Client,
    items: Vec<HttpItem>,
}

impl HttpSource {
    pub fn new(
        name: impl Into<String>,
        items: Vec<HttpItem>,
        config: HttpConfig,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| SourceError::Rejected(format!("invalid HTTP client config: {e}")))?;

        Ok(Self {
            name: name.into(),
            client,
            items,
        })
    }

    async fn download_to(&self, url: &str, target: &Path) -> Result<u64, SourceError> {
        debug!(url, "Starting download");

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        let mut file = tokio::fs::File::create(target)
            .await
            .map_err(|e| SourceError::Unavailable(format!("create {}: {e}", target.display())))?;

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(classify_request_error)? {
            file.write_all(&chunk)
                .await
                .map_err(|e| SourceError::Unavailable(format!("write {}: {e}", target.display())))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| SourceError::Unavailable(format!("flush {}: {e}", target.display())))?;

        Ok(written)
    }
}

fn classify_request_error(e: reqwest::Error) -> SourceError {
    if let Some(status) = e.status() {
        return classify_status(status);
    }
    if e.is_builder() {
        SourceError::Rejected(e.to_string())
    } else {
        SourceError::Unavailable(e.to_string())
    }
}

fn classify_status(status: StatusCode) -> SourceError {
    let message = format!(
        "HTTP {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    );
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::AuthFailed(message),
        StatusCode::NOT_FOUND | StatusCode::GONE => SourceError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            SourceError::Unavailable(message)
        }
        s if s.is_server_error() => SourceError::Unavailable(message),
        _ => SourceError::Rejected(message),
    }
}

#[async_trait]
impl SourceAdapter for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enumerate(&self, _cursor: Option<&str>) -> Result<Vec<ItemDescriptor>, SourceError> {
        Ok(self.items.iter().map(HttpItem::descriptor).collect())
    }

    async fn fetch(
        &self,
        item: &ItemDescriptor,
        staging_dir: &Path,
    ) -> Result<PathBuf, SourceError> {
        let url = item
            .locator
            .as_deref()
            .ok_or_else(|| SourceError::Rejected(format!("item {} has no URL", item.id)))?;
        let (target, partial) = staged_paths(staging_dir, &item.name);

        let result = match self.download_to(url, &partial).await {
            Ok(size) => tokio::fs::rename(&partial, &target)
                .await
                .map(|()| size)
                .map_err(|e| {
                    SourceError::Unavailable(format!("rename {}: {e}", partial.display()))
                }),
            Err(e) => Err(e),
        };

        match result {
            Ok(size) => {
                info!(source = %self.name, item = %item.id, size, "Download completed");
                Ok(target)
            }
            Err(e) => {
                warn!(source = %self.name, item = %item.id, error = %e, "Download failed");
                let _ = tokio::fs::remove_file(&partial).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(3600));
        assert_eq!(config.user_agent, "relaybox/0.1.0");
    }

    #[test]
    fn test_descriptor_derives_stable_id_and_name() {
        let item = HttpItem {
            id: None,
            url: "https://cdn.example.com/media/sermon-01.mp4?sig=abc".to_string(),
            name: None,
        };
        let a = item.descriptor();
        let b = item.descriptor();

        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), 16);
        assert_eq!(a.name, "sermon-01.mp4");
        assert_eq!(a.locator.as_deref(), Some(item.url.as_str()));
    }

    #[test]
    fn test_descriptor_prefers_explicit_values() {
        let item = HttpItem {
            id: Some("yt-abc".to_string()),
            url: "https://example.com/watch".to_string(),
            name: Some("Service.mp4".to_string()),
        };
        let d = item.descriptor();
        assert_eq!(d.id, "yt-abc");
        assert_eq!(d.name, "Service.mp4");
    }

    #[test]
    fn test_staged_paths_stay_in_staging_dir() {
        let staging = Path::new("/staging/1999/vid-1");
        for name in ["..", "../../etc/passwd", "a/b.mp4", ""] {
            let (target, partial) = staged_paths(staging, name);
            assert_eq!(target.parent(), Some(staging), "{name}");
            assert_eq!(partial.parent(), Some(staging), "{name}");
        }

        let (target, partial) = staged_paths(staging, "sermon-01.mp4");
        assert_eq!(target, staging.join("sermon-01.mp4"));
        assert_eq!(partial, staging.join("sermon-01.mp4.part"));
    }

    #[tokio::test]
    async fn test_failed_download_leaves_nothing_staged() {
        let staging = tempfile::TempDir::new().unwrap();
        let source = HttpSource::new("playlist", Vec::new(), HttpConfig::default()).unwrap();
        let item = ItemDescriptor::builder()
            .id("x")
            .name("x.mp4")
            .locator("http://127.0.0.1:9/x.mp4")
            .build();

        assert!(source.fetch(&item, staging.path()).await.is_err());
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN),
            SourceError::AuthFailed(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::GONE),
            SourceError::NotFound(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            SourceError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            SourceError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST),
            SourceError::Rejected(_)
        ));
    }
}
