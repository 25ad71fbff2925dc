//! Read-only projections over the ledger for operators
//!
//! Every read goes through ledger snapshots, so reporting never blocks the
//! workers writing to the same partitions.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ledger::{
    ErrorRecord, ItemState, Ledger, LedgerEntry, Result, WatchCursor, WatchState,
};
use crate::config::Config;

/// Per-state entry counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub discovered: usize,
    pub downloading: usize,
    pub downloaded: usize,
    pub uploading: usize,
    pub completed: usize,
    pub failed_transient: usize,
    pub failed_permanent: usize,
    pub abandoned: usize,
}

impl StateCounts {
    fn add(&mut self, state: ItemState) {
        use crate::model::FailureClass;

        let slot = match state {
            ItemState::Discovered => &mut self.discovered,
            ItemState::Downloading => &mut self.downloading,
            ItemState::Downloaded => &mut self.downloaded,
            ItemState::Uploading => &mut self.uploading,
            ItemState::Completed => &mut self.completed,
            ItemState::Failed(FailureClass::Transient) => &mut self.failed_transient,
            ItemState::Failed(FailureClass::Permanent) => &mut self.failed_permanent,
            ItemState::Abandoned => &mut self.abandoned,
        };
        *slot += 1;
    }

    pub fn total(&self) -> usize {
        self.discovered
            + self.downloading
            + self.downloaded
            + self.uploading
            + self.completed
            + self.failed_transient
            + self.failed_permanent
            + self.abandoned
    }

    /// Entries not yet completed or abandoned
    pub fn pending(&self) -> usize {
        self.total() - self.completed - self.abandoned
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionSummary {
    pub partition: String,
    pub items: usize,
    pub entries: usize,
    pub by_state: StateCounts,
    pub by_destination: BTreeMap<String, StateCounts>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// One failed or abandoned entry with its last recorded error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub item_id: String,
    pub item_name: String,
    pub destination: String,
    pub state: ItemState,
    pub attempts: u32,
    pub download_attempts: u32,
    pub last_error: Option<ErrorRecord>,
    pub updated_at: DateTime<Utc>,
}

impl From<LedgerEntry> for FailureReport {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            item_id: entry.item_id,
            item_name: entry.item_name,
            destination: entry.destination,
            state: entry.state,
            attempts: entry.attempts,
            download_attempts: entry.download_attempts,
            last_error: entry.last_error,
            updated_at: entry.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatcherReport {
    pub watcher: String,
    pub state: Option<WatchState>,
    pub cursor: Option<WatchCursor>,
    pub summary: PartitionSummary,
}

#[derive(Clone)]
pub struct StatusReporter {
    ledger: Arc<dyn Ledger>,
}

impl StatusReporter {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Counts per state and per destination for one partition
    pub fn summary(&self, partition: &str) -> Result<PartitionSummary> {
        let entries = self.ledger.list_by_partition(partition)?;
        Ok(summarize(partition, &entries))
    }

    /// Entries currently failed or abandoned, most recently updated first
    pub fn failures(&self, partition: &str) -> Result<Vec<FailureReport>> {
        let mut failures: Vec<FailureReport> = self
            .ledger
            .list_by_partition(partition)?
            .into_iter()
            .filter(|e| e.state.is_failure())
            .map(FailureReport::from)
            .collect();
        failures.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(failures)
    }

    /// Summaries of every known partition, watcher partitions included
    pub fn overview(&self) -> Result<Vec<PartitionSummary>> {
        self.ledger
            .partitions()?
            .iter()
            .map(|partition| self.summary(partition))
            .collect()
    }

    /// Last cycle report and cursor of one watcher
    pub fn watcher(&self, name: &str) -> Result<WatcherReport> {
        Ok(WatcherReport {
            watcher: name.to_string(),
            state: self.ledger.load_watch_state(name)?,
            cursor: self.ledger.load_cursor(name)?,
            summary: self.summary(&Config::watch_partition(name))?,
        })
    }
}

fn summarize(partition: &str, entries: &[LedgerEntry]) -> PartitionSummary {
    let mut by_state = StateCounts::default();
    let mut by_destination: BTreeMap<String, StateCounts> = BTreeMap::new();
    let mut items = std::collections::HashSet::new();

    for entry in entries {
        by_state.add(entry.state);
        by_destination
            .entry(entry.destination.clone())
            .or_default()
            .add(entry.state);
        items.insert(entry.item_id.as_str());
    }

    PartitionSummary {
        partition: partition.to_string(),
        items: items.len(),
        entries: entries.len(),
        by_state,
        by_destination,
        last_updated: entries.iter().map(|e| e.updated_at).max(),
    }
}
