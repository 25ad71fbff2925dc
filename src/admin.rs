//! Operator actions: return abandoned entries to the pipeline.

use std::sync::Arc;

use tracing::info;

use crate::ledger::{ItemState, Ledger, LedgerEntry, LedgerKey, Result, Transition};

#[derive(Clone)]
pub struct Admin {
    ledger: Arc<dyn Ledger>,
}

impl Admin {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Reset one abandoned entry to `Discovered`. Any other state is an
    /// invalid transition.
    pub fn reset(&self, key: &LedgerKey) -> Result<LedgerEntry> {
        let entry = self.ledger.upsert(key, Transition::Reset)?;
        info!(%key, "Entry reset by operator");
        Ok(entry)
    }

    /// Reset every abandoned entry of a partition; returns the reset keys
    pub fn reset_partition(&self, partition: &str) -> Result<Vec<LedgerKey>> {
        let mut reset = Vec::new();
        for entry in self.ledger.list_by_partition(partition)? {
            if entry.state != ItemState::Abandoned {
                continue;
            }
            let key = entry.key();
            self.ledger.upsert(&key, Transition::Reset)?;
            reset.push(key);
        }
        info!(partition, count = reset.len(), "Partition reset by operator");
        Ok(reset)
    }
}
