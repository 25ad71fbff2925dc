//! Per-item transfer sequence: settle old failures, download once, fan the
//! staged copy out to every pending destination, reclaim staging.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::future::join_all;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{DestinationTarget, EngineContext, SourceTarget, WorkerError, backoff};
use crate::adapters::{PublishError, PublishMetadata, SourceError};
use crate::ledger::{ItemState, LedgerEntry, LedgerKey, Transition};
use crate::model::{FailureClass, ItemDescriptor, Phase};
use crate::retry::RetryDecision;

/// Final disposition of the entries an item run started with
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ItemOutcome {
    pub completed: usize,
    pub abandoned: usize,
    pub pending: usize,
}

/// A downloaded, checksummed local copy
#[derive(Debug, Clone)]
struct Staged {
    path: PathBuf,
    size: u64,
    checksum: String,
}

pub(crate) struct ItemRun<'a> {
    pub ctx: &'a EngineContext,
    pub source: &'a SourceTarget,
    pub destinations: &'a [DestinationTarget],
    pub partition: &'a str,
    pub item_id: &'a str,
}

impl ItemRun<'_> {
    pub async fn run(self) -> Result<ItemOutcome, WorkerError> {
        if self.ctx.cancel.is_cancelled() {
            return self.stopped();
        }
        let Some(mut entries) = self.load_entries()? else {
            return Ok(ItemOutcome::default());
        };

        let active: Vec<usize> = (0..entries.len())
            .filter(|&i| !entries[i].state.is_terminal())
            .collect();
        if active.is_empty() {
            debug!("Item already settled");
            return Ok(ItemOutcome::default());
        }
        if self.ctx.cancel.is_cancelled() {
            return Ok(ItemOutcome {
                pending: active.len(),
                ..Default::default()
            });
        }

        self.settle_failures(&mut entries)?;

        if let Some(staged) = self.ensure_staged(&mut entries).await? {
            if !self.ctx.cancel.is_cancelled() {
                self.publish_all(&mut entries, &staged).await?;
            }
        }

        if entries.iter().all(|e| e.state.is_terminal()) {
            if let Err(e) = self.ctx.staging.reclaim(self.partition, self.item_id).await {
                warn!(error = %e, "Failed to reclaim staging");
            }
        }

        let mut outcome = ItemOutcome::default();
        for i in active {
            match entries[i].state {
                ItemState::Completed => outcome.completed += 1,
                ItemState::Abandoned => outcome.abandoned += 1,
                _ => outcome.pending += 1,
            }
        }
        Ok(outcome)
    }

    fn key(&self, destination: &str) -> LedgerKey {
        LedgerKey::new(self.partition, self.item_id, destination)
    }

    fn transition(
        &self,
        destination: &str,
        transition: Transition,
    ) -> Result<LedgerEntry, WorkerError> {
        self.ctx
            .ledger
            .upsert(&self.key(destination), transition)
            .map_err(|e| {
                if e.is_invalid_transition() {
                    self.ctx.metrics.invalid_transition();
                }
                e.into()
            })
    }

    fn abandon(&self, destination: &str, reason: &str) -> Result<LedgerEntry, WorkerError> {
        let entry = self.transition(destination, Transition::Abandon)?;
        self.ctx.metrics.entry_abandoned();
        warn!(destination, reason, "Entry abandoned");
        Ok(entry)
    }

    /// What is left to do, read without writing to the ledger
    fn stopped(&self) -> Result<ItemOutcome, WorkerError> {
        let mut known = false;
        let mut pending = 0;
        for destination in self.destinations {
            match self.ctx.ledger.get(&self.key(destination.name()))? {
                Some(entry) => {
                    known = true;
                    if !entry.state.is_terminal() {
                        pending += 1;
                    }
                }
                None => pending += 1,
            }
        }
        Ok(ItemOutcome {
            pending: if known { pending } else { 0 },
            ..Default::default()
        })
    }

    /// Current entries in destination order. Destinations missing an entry
    /// (a crash mid-discovery) are discovered from a sibling's metadata.
    fn load_entries(&self) -> Result<Option<Vec<LedgerEntry>>, WorkerError> {
        let mut found = Vec::with_capacity(self.destinations.len());
        for destination in self.destinations {
            found.push(self.ctx.ledger.get(&self.key(destination.name()))?);
        }

        let Some(descriptor) = found.iter().flatten().next().map(LedgerEntry::descriptor) else {
            return Ok(None);
        };

        let mut entries = Vec::with_capacity(found.len());
        for (destination, entry) in self.destinations.iter().zip(found) {
            let entry = match entry {
                Some(entry) => entry,
                None => self.transition(destination.name(), Transition::Discover(descriptor.clone()))?,
            };
            entries.push(entry);
        }
        Ok(Some(entries))
    }

    /// Abandon failures left by an earlier run that may not be retried
    fn settle_failures(&self, entries: &mut [LedgerEntry]) -> Result<(), WorkerError> {
        for (entry, destination) in entries.iter_mut().zip(self.destinations) {
            let ItemState::Failed(class) = entry.state else {
                continue;
            };
            let decision = match entry.phase {
                Some(Phase::Upload) => destination.policy.decide(entry.attempts, class),
                _ => self.source.policy.decide(entry.download_attempts, class),
            };
            if decision == RetryDecision::GiveUp {
                *entry = self.abandon(destination.name(), "retries exhausted before restart")?;
            }
        }
        Ok(())
    }

    /// Make sure a staged copy exists for every entry that still needs one
    async fn ensure_staged(
        &self,
        entries: &mut [LedgerEntry],
    ) -> Result<Option<Staged>, WorkerError> {
        let existing = existing_copy(entries).await;

        let need: Vec<usize> = (0..entries.len())
            .filter(|&i| {
                let entry = &entries[i];
                !entry.state.is_terminal() && (existing.is_none() || awaits_download(entry))
            })
            .collect();
        if need.is_empty() {
            return Ok(existing);
        }

        if let Some(staged) = existing {
            for &i in &need {
                let name = self.destinations[i].name();
                self.transition(name, Transition::BeginDownload)?;
                entries[i] = self.transition(name, finish(&staged))?;
            }
            debug!(path = %staged.path.display(), "Reusing staged copy");
            return Ok(Some(staged));
        }

        self.download(entries, &need).await
    }

    async fn download(
        &self,
        entries: &mut [LedgerEntry],
        need: &[usize],
    ) -> Result<Option<Staged>, WorkerError> {
        let dir = self.ctx.staging.prepare(self.partition, self.item_id).await?;
        let item = entries[need[0]].descriptor();
        let recorded = entries.iter().find_map(|e| e.checksum.clone());

        loop {
            if self.ctx.cancel.is_cancelled() {
                return Ok(None);
            }

            for &i in need {
                entries[i] = self.transition(self.destinations[i].name(), Transition::BeginDownload)?;
            }
            let attempt = need
                .iter()
                .map(|&i| entries[i].download_attempts)
                .max()
                .unwrap_or(1);

            let error = match self.fetch(&item, &dir).await {
                Ok(staged) => match &recorded {
                    Some(expected) if *expected != staged.checksum => SourceError::Rejected(format!(
                        "content changed at source: expected {expected}, got {}",
                        staged.checksum
                    )),
                    _ => {
                        for &i in need {
                            entries[i] = self.transition(self.destinations[i].name(), finish(&staged))?;
                        }
                        self.ctx.metrics.download_completed();
                        info!(
                            attempt,
                            size = staged.size,
                            checksum = %staged.checksum,
                            "Item downloaded"
                        );
                        return Ok(Some(staged));
                    }
                },
                Err(e) => e,
            };

            self.ctx.metrics.download_failed();
            let class = error.class();
            for &i in need {
                entries[i] = self.transition(
                    self.destinations[i].name(),
                    Transition::Fail {
                        class,
                        message: error.to_string(),
                    },
                )?;
            }

            match self.source.policy.decide(attempt, class) {
                RetryDecision::GiveUp => {
                    warn!(attempt, error = %error, "Download failed, giving up");
                    for &i in need {
                        entries[i] = self.abandon(self.destinations[i].name(), "download failed")?;
                    }
                    return Ok(None);
                }
                RetryDecision::Retry(delay) => {
                    self.ctx.metrics.retry_scheduled();
                    warn!(attempt, error = %error, delay_ms = delay.as_millis() as u64, "Download failed, retrying");
                    if !backoff(&self.ctx.cancel, delay).await {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Fetch under the adapter timeout and checksum the result
    async fn fetch(&self, item: &ItemDescriptor, dir: &Path) -> Result<Staged, SourceError> {
        let timeout = self.ctx.adapter_timeout;
        let path = tokio::time::timeout(timeout, self.source.adapter.fetch(item, dir))
            .await
            .unwrap_or_else(|_| Err(timed_out_source(timeout)))?;

        let (size, checksum) = digest_file(path.clone())
            .await
            .map_err(|e| SourceError::Unavailable(format!("reading staged {}: {e}", path.display())))?;
        Ok(Staged {
            path,
            size,
            checksum,
        })
    }

    async fn publish_all(
        &self,
        entries: &mut [LedgerEntry],
        staged: &Staged,
    ) -> Result<(), WorkerError> {
        let targets: Vec<usize> = (0..entries.len())
            .filter(|&i| !entries[i].state.is_terminal())
            .collect();

        let uploads = targets.iter().map(|&i| {
            let entry = entries[i].clone();
            self.publish_one(&self.destinations[i], entry, staged)
        });
        let results = join_all(uploads).await;

        let mut first_error = None;
        for (i, result) in targets.into_iter().zip(results) {
            match result {
                Ok(entry) => entries[i] = entry,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Drive one destination until it completes, is abandoned, or the run
    /// is cancelled
    async fn publish_one(
        &self,
        destination: &DestinationTarget,
        mut entry: LedgerEntry,
        staged: &Staged,
    ) -> Result<LedgerEntry, WorkerError> {
        let name = destination.name();
        let metadata = PublishMetadata {
            partition: self.partition.to_string(),
            item_id: self.item_id.to_string(),
            name: entry.item_name.clone(),
            size: staged.size,
            checksum: staged.checksum.clone(),
        };
        let timeout = self.ctx.adapter_timeout;

        loop {
            if entry.state.is_terminal() || self.ctx.cancel.is_cancelled() {
                return Ok(entry);
            }

            entry = self.transition(name, Transition::BeginUpload)?;
            let attempt = entry.attempts;

            let result = tokio::time::timeout(
                timeout,
                destination.adapter.publish(&staged.path, &metadata),
            )
            .await
            .unwrap_or_else(|_| Err(timed_out_publish(timeout)));

            let error = match result {
                Ok(reference) => {
                    self.ctx.metrics.publish_completed();
                    info!(destination = name, attempt, reference, "Published");
                    return self.transition(name, Transition::Complete { reference });
                }
                Err(e) => e,
            };

            self.ctx.metrics.publish_failed();
            let class = error.class();
            entry = self.transition(
                name,
                Transition::Fail {
                    class,
                    message: error.to_string(),
                },
            )?;

            match destination.policy.decide(entry.attempts, class) {
                RetryDecision::GiveUp => {
                    warn!(destination = name, attempt, error = %error, "Publish failed, giving up");
                    return self.abandon(name, match class {
                        FailureClass::Permanent => "permanent publish failure",
                        FailureClass::Transient => "publish retries exhausted",
                    });
                }
                RetryDecision::Retry(delay) => {
                    let wait = error.retry_after().map_or(delay, |hint| hint.max(delay));
                    self.ctx.metrics.retry_scheduled();
                    warn!(
                        destination = name,
                        attempt,
                        error = %error,
                        delay_ms = wait.as_millis() as u64,
                        "Publish failed, retrying"
                    );
                    if !backoff(&self.ctx.cancel, wait).await {
                        return Ok(entry);
                    }
                }
            }
        }
    }
}

/// States that still need the item fetched before uploading
fn awaits_download(entry: &LedgerEntry) -> bool {
    match entry.state {
        ItemState::Discovered | ItemState::Downloading => true,
        ItemState::Failed(_) => entry.phase != Some(Phase::Upload),
        _ => false,
    }
}

/// A staged file recorded by any entry of the item that is still on disk
async fn existing_copy(entries: &[LedgerEntry]) -> Option<Staged> {
    for entry in entries {
        let (Some(path), Some(size), Some(checksum)) =
            (&entry.staged_path, entry.size, &entry.checksum)
        else {
            continue;
        };
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Some(Staged {
                path: path.clone(),
                size,
                checksum: checksum.clone(),
            });
        }
    }
    None
}

fn finish(staged: &Staged) -> Transition {
    Transition::FinishDownload {
        staged_path: staged.path.clone(),
        size: staged.size,
        checksum: staged.checksum.clone(),
    }
}

fn timed_out_source(timeout: Duration) -> SourceError {
    SourceError::Unavailable(format!("fetch timed out after {}s", timeout.as_secs()))
}

fn timed_out_publish(timeout: Duration) -> PublishError {
    PublishError::Transient(format!("publish timed out after {}s", timeout.as_secs()))
}

/// Size and SHA-256 (hex) of a file
async fn digest_file(path: PathBuf) -> std::io::Result<(u64, String)> {
    tokio::task::spawn_blocking(move || -> std::io::Result<(u64, String)> {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let size = std::io::copy(&mut file, &mut hasher)?;
        Ok((size, format!("{:x}", hasher.finalize())))
    })
    .await
    .map_err(std::io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_digest_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"abc").unwrap();

        let (size, checksum) = digest_file(path).await.unwrap();
        assert_eq!(size, 3);
        assert_eq!(
            checksum,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_awaits_download() {
        let item = ItemDescriptor::builder().id("a").name("a.mp4").build();
        let key = LedgerKey::new("p", "a", "d");
        let mut entry = crate::ledger::state::apply(None, &key, Transition::Discover(item), chrono::Utc::now())
            .unwrap()
            .entry;
        assert!(awaits_download(&entry));

        entry.state = ItemState::Failed(FailureClass::Transient);
        entry.phase = Some(Phase::Upload);
        assert!(!awaits_download(&entry));

        entry.phase = Some(Phase::Download);
        assert!(awaits_download(&entry));

        entry.state = ItemState::Downloaded;
        assert!(!awaits_download(&entry));
    }
}
