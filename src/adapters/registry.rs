use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::directory::DirectorySource;
use super::http::{HttpConfig, HttpItem, HttpSource};
use super::storage::{ObjectStoreDestination, S3Options};
use super::traits::{DestinationAdapter, SourceAdapter};
use crate::config::{Config, DestinationKind, SourceKind};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("source not found: {0}")]
    SourceNotFound(String),
    #[error("destination not found: {0}")]
    DestinationNotFound(String),
    #[error("failed to build adapter '{name}': {reason}")]
    Build { name: String, reason: String },
}

/// Named adapter instances, built once from configuration
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    sources: BTreeMap<String, Arc<dyn SourceAdapter>>,
    destinations: BTreeMap<String, Arc<dyn DestinationAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.sources.insert(adapter.name().to_string(), adapter);
    }

    pub fn register_destination(&mut self, adapter: Arc<dyn DestinationAdapter>) {
        self.destinations.insert(adapter.name().to_string(), adapter);
    }

    pub fn source(&self, name: &str) -> Result<Arc<dyn SourceAdapter>, RegistryError> {
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::SourceNotFound(name.to_string()))
    }

    pub fn destination(&self, name: &str) -> Result<Arc<dyn DestinationAdapter>, RegistryError> {
        self.destinations
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::DestinationNotFound(name.to_string()))
    }

    /// Build every configured source and destination
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        let mut registry = Self::new();

        for (name, source) in &config.sources {
            let adapter: Arc<dyn SourceAdapter> = match &source.kind {
                SourceKind::Directory {
                    root,
                    extensions,
                    recursive,
                } => Arc::new(
                    DirectorySource::new(name, root)
                        .with_extensions(extensions)
                        .recursive(*recursive),
                ),
                SourceKind::Http {
                    items,
                    connect_timeout_secs,
                    request_timeout_secs,
                    user_agent,
                } => {
                    let mut http = HttpConfig {
                        connect_timeout: Duration::from_secs(*connect_timeout_secs),
                        request_timeout: Duration::from_secs(*request_timeout_secs),
                        ..HttpConfig::default()
                    };
                    if let Some(user_agent) = user_agent {
                        http.user_agent = user_agent.clone();
                    }
                    let items = items
                        .iter()
                        .map(|item| HttpItem {
                            id: item.id.clone(),
                            url: item.url.clone(),
                            name: item.name.clone(),
                        })
                        .collect();
                    Arc::new(HttpSource::new(name, items, http).map_err(|e| {
                        RegistryError::Build {
                            name: name.clone(),
                            reason: e.to_string(),
                        }
                    })?)
                }
            };
            registry.register_source(adapter);
        }

        for (name, destination) in &config.destinations {
            let built = match &destination.kind {
                DestinationKind::Memory { prefix } => Ok(ObjectStoreDestination::new(
                    name,
                    Arc::new(object_store::memory::InMemory::new()),
                    prefix.clone(),
                )),
                DestinationKind::Local { root, prefix } => {
                    ObjectStoreDestination::local(name, root, prefix.clone())
                }
                DestinationKind::S3 {
                    bucket,
                    region,
                    endpoint,
                    prefix,
                } => ObjectStoreDestination::s3(
                    name,
                    S3Options {
                        bucket: bucket.clone(),
                        region: region.clone(),
                        endpoint: endpoint.clone(),
                        access_key: config.secrets.s3_access_key.clone(),
                        secret_key: config.secrets.s3_secret_key.clone(),
                    },
                    prefix.clone(),
                ),
            };
            let adapter = built.map_err(|e| RegistryError::Build {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            registry.register_destination(Arc::new(adapter));
        }

        Ok(registry)
    }
}
