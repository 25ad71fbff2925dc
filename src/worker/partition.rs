use std::collections::HashSet;

use futures_util::{StreamExt, stream};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::pipeline::ItemRun;
use super::{
    DestinationTarget, EngineContext, ItemOutcome, RunStats, SourceTarget, WorkerError, backoff,
};
use crate::ledger::{LedgerEntry, LedgerKey, Transition};
use crate::model::ItemDescriptor;
use crate::retry::RetryDecision;

/// Drives one partition: one source, a fixed ordered destination list.
pub struct PartitionWorker {
    id: String,
    source: SourceTarget,
    destinations: Vec<DestinationTarget>,
    concurrency: usize,
    ctx: EngineContext,
}

impl PartitionWorker {
    pub fn new(
        id: impl Into<String>,
        source: SourceTarget,
        destinations: Vec<DestinationTarget>,
        concurrency: usize,
        ctx: EngineContext,
    ) -> Self {
        Self {
            id: id.into(),
            source,
            destinations,
            concurrency: concurrency.max(1),
            ctx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination_names(&self) -> Vec<String> {
        self.destinations.iter().map(|d| d.name().to_string()).collect()
    }

    /// Enumerate, discover, then process every pending item of the partition.
    ///
    /// Entries left non-terminal by an earlier run are processed even when the
    /// source no longer lists their item. A source that cannot be enumerated
    /// still lets pending items resume; the enumeration error is returned
    /// afterwards.
    pub async fn run(&self) -> Result<RunStats, WorkerError> {
        let span = info_span!("partition", partition = %self.id, source = %self.source.name());
        async {
            self.ctx
                .ledger
                .bind_destinations(&self.id, &self.destination_names())?;

            let (discovered, enumeration_error) = match self.enumerate(None).await {
                Ok(items) => (self.discover(&items)?, None),
                Err(e) => {
                    error!(error = %e, "Enumeration failed, resuming known items only");
                    (0, Some(e))
                }
            };

            let mut stats = self.process_pending().await?;
            stats.discovered = discovered;
            info!(
                discovered = stats.discovered,
                items = stats.items,
                completed = stats.completed,
                abandoned = stats.abandoned,
                pending = stats.pending,
                "Partition run finished"
            );

            match enumeration_error {
                Some(e) => Err(e),
                None => Ok(stats),
            }
        }
        .instrument(span)
        .await
    }

    /// List source items, retrying transient failures with the source policy
    pub(crate) async fn enumerate(
        &self,
        cursor: Option<&str>,
    ) -> Result<Vec<ItemDescriptor>, WorkerError> {
        let timeout = self.ctx.adapter_timeout;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let result = tokio::time::timeout(timeout, self.source.adapter.enumerate(cursor))
                .await
                .unwrap_or_else(|_| {
                    Err(crate::adapters::SourceError::Unavailable(format!(
                        "enumeration timed out after {}s",
                        timeout.as_secs()
                    )))
                });

            let error = match result {
                Ok(items) => {
                    debug!(count = items.len(), attempts, "Source enumerated");
                    return Ok(items);
                }
                Err(e) => e,
            };

            let give_up = || WorkerError::Enumeration {
                source_name: self.source.name().to_string(),
                attempts,
                error: error.clone(),
            };
            match self.source.policy.decide(attempts, error.class()) {
                RetryDecision::GiveUp => return Err(give_up()),
                RetryDecision::Retry(delay) => {
                    self.ctx.metrics.retry_scheduled();
                    warn!(attempts, error = %error, delay_ms = delay.as_millis() as u64, "Enumeration failed, retrying");
                    if !backoff(&self.ctx.cancel, delay).await {
                        return Err(give_up());
                    }
                }
            }
        }
    }

    /// Record a `Discovered` entry per destination for every unkeyed item.
    /// Returns how many items were new.
    pub(crate) fn discover(&self, items: &[ItemDescriptor]) -> Result<usize, WorkerError> {
        let mut seen = HashSet::new();
        let mut new_items = 0;

        for item in items {
            if self.ctx.cancel.is_cancelled() {
                break;
            }
            if !seen.insert(item.id.as_str()) {
                warn!(item = %item.id, "Source listed an item twice");
                continue;
            }

            let mut created = false;
            for destination in &self.destinations {
                let key = LedgerKey::new(&self.id, &item.id, destination.name());
                if self.ctx.ledger.get(&key)?.is_none() {
                    self.ctx.ledger.upsert(&key, Transition::Discover(item.clone()))?;
                    created = true;
                }
            }
            if created {
                new_items += 1;
                self.ctx.metrics.item_discovered();
                debug!(item = %item.id, name = %item.name, "Discovered item");
            }
        }
        Ok(new_items)
    }

    /// Process every item with a non-terminal entry, `concurrency` at a time
    pub(crate) async fn process_pending(&self) -> Result<RunStats, WorkerError> {
        let entries = self.ctx.ledger.list_by_partition(&self.id)?;
        let items = pending_items(entries);
        debug!(count = items.len(), "Pending items");

        let outcomes: Vec<(String, Result<ItemOutcome, WorkerError>)> = stream::iter(items)
            .map(|item_id| async move {
                let run = ItemRun {
                    ctx: &self.ctx,
                    source: &self.source,
                    destinations: &self.destinations,
                    partition: &self.id,
                    item_id: &item_id,
                };
                let span = info_span!("item", item = %item_id);
                let result = run.run().instrument(span).await;
                (item_id, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut stats = RunStats::default();
        for (item_id, result) in outcomes {
            match result {
                Ok(outcome) => stats.absorb(outcome),
                Err(e) if e.is_invalid_transition() => {
                    // Logged by the ledger; only this item is aborted
                    stats.errors += 1;
                    error!(item = %item_id, error = %e, "Item aborted on ledger state conflict");
                }
                Err(WorkerError::Staging(e)) => {
                    stats.errors += 1;
                    error!(item = %item_id, error = %e, "Item aborted, staging unavailable");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(stats)
    }
}

/// Item ids with at least one non-terminal entry, in source order
fn pending_items(entries: Vec<LedgerEntry>) -> Vec<String> {
    let mut pending: Vec<LedgerEntry> = entries
        .into_iter()
        .filter(|e| !e.state.is_terminal())
        .collect();
    pending.sort_by(|a, b| {
        (&a.position, a.discovered_at, &a.item_id).cmp(&(&b.position, b.discovered_at, &b.item_id))
    });

    let mut seen = HashSet::new();
    pending
        .into_iter()
        .filter_map(|e| seen.insert(e.item_id.clone()).then_some(e.item_id))
        .collect()
}
