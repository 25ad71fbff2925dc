//! Object storage destination
//! Uses Apache Arrow object_store crate

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{ObjectStore, WriteMultipart, path::Path as StoragePath};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use super::traits::{DestinationAdapter, PublishError, PublishMetadata};
use crate::staging::path_component;

/// Multipart part size (S3 minimum is 5 MiB)
const PART_SIZE: usize = 8 * 1024 * 1024;

/// Connection settings for an S3 destination
#[derive(Debug, Clone, Default)]
pub struct S3Options {
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

/// Destination writing each item under `<prefix>/<partition>/<item id>/<name>`
#[derive(Clone)]
pub struct ObjectStoreDestination {
    name: String,
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStoreDestination {
    /// Create a destination over any object_store backend
    pub fn new(name: impl Into<String>, store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store,
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    /// In-memory storage for testing/development
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::new(name, Arc::new(object_store::memory::InMemory::new()), "")
    }

    /// Filesystem-backed storage rooted at `root` (created if missing)
    pub fn local(
        name: impl Into<String>,
        root: impl AsRef<Path>,
        prefix: impl Into<String>,
    ) -> object_store::Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| object_store::Error::Generic {
            store: "LocalFileSystem",
            source: Box::new(e),
        })?;
        let store = object_store::local::LocalFileSystem::new_with_prefix(root)?;
        Ok(Self::new(name, Arc::new(store), prefix))
    }

    /// S3 (or S3-compatible) bucket. Credentials not given here fall back
    /// to the standard AWS environment variables.
    pub fn s3(
        name: impl Into<String>,
        options: S3Options,
        prefix: impl Into<String>,
    ) -> object_store::Result<Self> {
        let mut builder =
            object_store::aws::AmazonS3Builder::from_env().with_bucket_name(&options.bucket);
        if let Some(region) = &options.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &options.endpoint {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }
        if let (Some(access_key), Some(secret_key)) = (&options.access_key, &options.secret_key) {
            builder = builder
                .with_access_key_id(access_key)
                .with_secret_access_key(secret_key);
        }
        Ok(Self::new(name, Arc::new(builder.build()?), prefix))
    }

    /// Object key for one item. Only the item id is unique within a
    /// partition, so display names alone never address an object.
    pub fn object_key(&self, metadata: &PublishMetadata) -> String {
        let key = [&metadata.partition, &metadata.item_id, &metadata.name]
            .map(|part| path_component(part))
            .join("/");
        if self.prefix.is_empty() {
            key
        } else {
            format!("{}/{key}", self.prefix)
        }
    }

    /// Check if key exists
    pub async fn exists(&self, key: &str) -> object_store::Result<bool> {
        match self.store.head(&StoragePath::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read an object back in full
    pub async fn read(&self, key: &str) -> object_store::Result<Bytes> {
        self.store.get(&StoragePath::from(key)).await?.bytes().await
    }

    async fn upload(&self, local_path: &Path, key: &str) -> Result<u64, PublishError> {
        let mut file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| PublishError::Permanent(format!("open {}: {e}", local_path.display())))?;

        let path = StoragePath::from(key);
        let upload = self.store.put_multipart(&path).await.map_err(classify)?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, PART_SIZE);

        let mut buf = vec![0u8; PART_SIZE];
        let mut total = 0u64;
        loop {
            let read = match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    let _ = writer.abort().await;
                    return Err(PublishError::Transient(format!(
                        "read {}: {e}",
                        local_path.display()
                    )));
                }
            };
            if let Err(e) = writer.wait_for_capacity(2).await {
                let _ = writer.abort().await;
                return Err(classify(e));
            }
            writer.write(&buf[..read]);
            total += read as u64;
        }

        writer.finish().await.map_err(classify)?;
        Ok(total)
    }
}

fn classify(err: object_store::Error) -> PublishError {
    use object_store::Error;

    match err {
        Error::NotFound { .. }
        | Error::AlreadyExists { .. }
        | Error::Precondition { .. }
        | Error::NotSupported { .. }
        | Error::NotImplemented { .. }
        | Error::InvalidPath { .. }
        | Error::UnknownConfigurationKey { .. } => PublishError::Permanent(err.to_string()),
        _ => PublishError::Transient(err.to_string()),
    }
}

#[async_trait]
impl DestinationAdapter for ObjectStoreDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(
        &self,
        local_path: &Path,
        metadata: &PublishMetadata,
    ) -> Result<String, PublishError> {
        let key = self.object_key(metadata);
        debug!(destination = %self.name, key, "Uploading to object store");

        let size = self.upload(local_path, &key).await?;

        info!(
            destination = %self.name,
            partition = %metadata.partition,
            item = %metadata.item_id,
            key,
            size,
            "Uploaded to storage"
        );
        Ok(key)
    }
}
