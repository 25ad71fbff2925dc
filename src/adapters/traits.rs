use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::model::{FailureClass, ItemDescriptor};

/// Source-side failures, classified at the adapter boundary
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("source authentication failed: {0}")]
    AuthFailed(String),
    #[error("item not found at source: {0}")]
    NotFound(String),
    #[error("source rejected request: {0}")]
    Rejected(String),
}

impl SourceError {
    pub fn class(&self) -> FailureClass {
        match self {
            SourceError::Unavailable(_) => FailureClass::Transient,
            SourceError::AuthFailed(_) | SourceError::NotFound(_) | SourceError::Rejected(_) => {
                FailureClass::Permanent
            }
        }
    }
}

/// Destination-side failures, classified at the adapter boundary
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("transient publish failure: {0}")]
    Transient(String),
    /// Transient, but the platform told us how long to back off
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("permanent publish failure: {0}")]
    Permanent(String),
}

impl PublishError {
    pub fn class(&self) -> FailureClass {
        match self {
            PublishError::Transient(_) | PublishError::RateLimited { .. } => {
                FailureClass::Transient
            }
            PublishError::Permanent(_) => FailureClass::Permanent,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PublishError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Metadata handed to a destination alongside the staged file
#[derive(Debug, Clone, Serialize)]
pub struct PublishMetadata {
    pub partition: String,
    pub item_id: String,
    pub name: String,
    pub size: u64,
    pub checksum: String,
}

/// Enumerates and fetches items of a partition or watch root.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// List available items. Sources that can order their items return only
    /// those at or after `cursor`; others ignore it.
    async fn enumerate(&self, cursor: Option<&str>) -> Result<Vec<ItemDescriptor>, SourceError>;

    /// Download one item into `staging_dir` and return the local path.
    async fn fetch(&self, item: &ItemDescriptor, staging_dir: &Path)
    -> Result<PathBuf, SourceError>;
}

/// Durably stores or publishes one local item.
///
/// Must tolerate being called again for the same item when the outcome of a
/// previous call is unknown.
#[async_trait]
pub trait DestinationAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Publish the staged file and return a destination reference.
    async fn publish(
        &self,
        local_path: &Path,
        metadata: &PublishMetadata,
    ) -> Result<String, PublishError>;
}
