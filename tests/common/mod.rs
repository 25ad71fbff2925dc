//! Scripted in-process adapters and helpers shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relaybox::adapters::{
    DestinationAdapter, PublishError, PublishMetadata, SourceAdapter, SourceError,
};
use relaybox::ledger::FjallLedger;
use relaybox::model::ItemDescriptor;
use relaybox::retry::RetryPolicy;
use relaybox::staging::Staging;
use relaybox::worker::{DestinationTarget, EngineContext, SourceTarget};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Source serving a mutable item list; content is derived from the item id
/// unless overridden.
#[derive(Default)]
pub struct ScriptedSource {
    items: Mutex<Vec<ItemDescriptor>>,
    content: Mutex<HashMap<String, Vec<u8>>>,
    fetch_failures: Mutex<VecDeque<SourceError>>,
    enumerate_failure: Mutex<Option<SourceError>>,
    fetches: Mutex<HashMap<String, usize>>,
    fetch_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(items: Vec<ItemDescriptor>) -> Arc<Self> {
        let source = Self::default();
        *source.items.lock().unwrap() = items;
        Arc::new(source)
    }

    pub fn set_items(&self, items: Vec<ItemDescriptor>) {
        *self.items.lock().unwrap() = items;
    }

    pub fn set_content(&self, id: &str, bytes: &[u8]) {
        self.content
            .lock()
            .unwrap()
            .insert(id.to_string(), bytes.to_vec());
    }

    pub fn fail_next_fetches(&self, errors: impl IntoIterator<Item = SourceError>) {
        self.fetch_failures.lock().unwrap().extend(errors);
    }

    pub fn fail_enumeration(&self, error: Option<SourceError>) {
        *self.enumerate_failure.lock().unwrap() = error;
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn fetches_of(&self, id: &str) -> usize {
        self.fetches.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn enumerate(&self, cursor: Option<&str>) -> Result<Vec<ItemDescriptor>, SourceError> {
        if let Some(error) = self.enumerate_failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|item| match (cursor, item.position.as_deref()) {
                (Some(cursor), Some(position)) => position >= cursor,
                _ => true,
            })
            .cloned()
            .collect())
    }

    async fn fetch(
        &self,
        item: &ItemDescriptor,
        staging_dir: &Path,
    ) -> Result<PathBuf, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .fetches
            .lock()
            .unwrap()
            .entry(item.id.clone())
            .or_default() += 1;

        if let Some(error) = self.fetch_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let bytes = self
            .content
            .lock()
            .unwrap()
            .get(&item.id)
            .cloned()
            .unwrap_or_else(|| format!("content-of-{}", item.id).into_bytes());
        let path = staging_dir.join(&item.name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        Ok(path)
    }
}

/// Destination replaying scripted outcomes, then succeeding (or failing
/// forever when `always_fail` is set).
pub struct ScriptedDestination {
    name: String,
    script: Mutex<VecDeque<PublishError>>,
    always_fail: Mutex<Option<PublishError>>,
    delay: Duration,
    calls: AtomicUsize,
    published: Mutex<Vec<(String, String)>>,
}

impl ScriptedDestination {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, Duration::ZERO))
    }

    /// Every publish call takes at least `delay`
    pub fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(name, delay))
    }

    fn build(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            always_fail: Mutex::new(None),
            delay,
            calls: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next(&self, errors: impl IntoIterator<Item = PublishError>) {
        self.script.lock().unwrap().extend(errors);
    }

    pub fn fail_always(&self, error: PublishError) {
        *self.always_fail.lock().unwrap() = Some(error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// (item id, checksum) of every successful publish
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl DestinationAdapter for ScriptedDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(
        &self,
        local_path: &Path,
        metadata: &PublishMetadata,
    ) -> Result<String, PublishError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(error) = self.always_fail.lock().unwrap().clone() {
            return Err(error);
        }
        if let Some(error) = self.script.lock().unwrap().pop_front() {
            return Err(error);
        }

        assert!(local_path.exists(), "staged file missing at publish time");
        self.published
            .lock()
            .unwrap()
            .push((metadata.item_id.clone(), metadata.checksum.clone()));
        Ok(format!("{}:{}", self.name, metadata.item_id))
    }
}

pub fn item(id: &str) -> ItemDescriptor {
    ItemDescriptor::builder()
        .id(id)
        .name(format!("{id}.mp4"))
        .build()
}

pub fn positioned(id: &str, position: &str) -> ItemDescriptor {
    ItemDescriptor::builder()
        .id(id)
        .name(format!("{id}.mp4"))
        .position(position)
        .build()
}

/// Retries without meaningful waiting
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Duration::from_millis(1),
        Duration::from_millis(5),
    )
}

pub fn source_target(source: &Arc<ScriptedSource>) -> SourceTarget {
    SourceTarget::new(source.clone(), fast_policy(3))
}

pub fn destination_target(destination: &Arc<ScriptedDestination>, max_attempts: u32) -> DestinationTarget {
    DestinationTarget::new(destination.clone(), fast_policy(max_attempts))
}

/// Ledger and staging rooted in one temp dir
pub struct Harness {
    pub dir: TempDir,
    pub ledger: Arc<FjallLedger>,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(FjallLedger::open(dir.path().join("ledger")).unwrap());
        Self {
            dir,
            ledger,
            cancel: CancellationToken::new(),
        }
    }

    /// Drop the ledger handle and open it again from disk
    pub fn reopen(self) -> Self {
        let Harness { dir, ledger, .. } = self;
        ledger.persist().unwrap();
        drop(ledger);
        let ledger = Arc::new(FjallLedger::open(dir.path().join("ledger")).unwrap());
        Self {
            dir,
            ledger,
            cancel: CancellationToken::new(),
        }
    }

    pub fn staging_root(&self) -> PathBuf {
        self.dir.path().join("staging")
    }

    pub fn ctx(&self) -> EngineContext {
        self.ctx_with_timeout(Duration::from_secs(30))
    }

    pub fn ctx_with_timeout(&self, adapter_timeout: Duration) -> EngineContext {
        EngineContext::builder()
            .ledger(self.ledger.clone())
            .staging(Staging::new(self.staging_root()))
            .adapter_timeout(adapter_timeout)
            .cancel(self.cancel.clone())
            .build()
    }
}
