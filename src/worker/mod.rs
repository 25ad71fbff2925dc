//! Transfer workers
//!
//! A [`PartitionWorker`] drives one partition end-to-end: enumerate the
//! source, record discoveries in the ledger, then move every pending item
//! through download and fan-out upload. A [`Watcher`] runs the same sequence
//! on a poll loop for one (source, destination) pair.

pub mod partition;
mod pipeline;
pub mod watcher;

pub use partition::PartitionWorker;
pub use pipeline::ItemOutcome;
pub use watcher::Watcher;

use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::adapters::{DestinationAdapter, SourceAdapter, SourceError};
use crate::ledger::{Ledger, LedgerError};
use crate::observability::Metrics;
use crate::retry::RetryPolicy;
use crate::staging::{Staging, StagingError};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Staging error: {0}")]
    Staging(#[from] StagingError),

    #[error("Enumerating source '{source_name}' failed after {attempts} attempt(s): {error}")]
    Enumeration {
        source_name: String,
        attempts: u32,
        error: SourceError,
    },
}

impl WorkerError {
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, WorkerError::Ledger(e) if e.is_invalid_transition())
    }
}

/// Handles shared by every worker and watcher of one engine
#[derive(Clone, Builder)]
pub struct EngineContext {
    pub ledger: Arc<dyn Ledger>,
    pub staging: Staging,
    #[builder(default)]
    pub metrics: Arc<Metrics>,
    /// Upper bound on one fetch or publish call; elapsing counts as transient
    #[builder(default = Duration::from_secs(3600))]
    pub adapter_timeout: Duration,
    #[builder(default)]
    pub cancel: CancellationToken,
}

/// A source adapter with the policy for its download and listing retries
#[derive(Clone)]
pub struct SourceTarget {
    pub adapter: Arc<dyn SourceAdapter>,
    pub policy: RetryPolicy,
}

impl SourceTarget {
    pub fn new(adapter: Arc<dyn SourceAdapter>, policy: RetryPolicy) -> Self {
        Self { adapter, policy }
    }

    pub fn name(&self) -> &str {
        self.adapter.name()
    }
}

/// A destination adapter with its publish retry policy
#[derive(Clone)]
pub struct DestinationTarget {
    pub adapter: Arc<dyn DestinationAdapter>,
    pub policy: RetryPolicy,
}

impl DestinationTarget {
    pub fn new(adapter: Arc<dyn DestinationAdapter>, policy: RetryPolicy) -> Self {
        Self { adapter, policy }
    }

    pub fn name(&self) -> &str {
        self.adapter.name()
    }
}

/// Totals for one partition run or watcher cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Items seen for the first time
    pub discovered: usize,
    /// Items that had pending work
    pub items: usize,
    /// Entries that reached `completed` during the run
    pub completed: usize,
    /// Entries that reached `abandoned` during the run
    pub abandoned: usize,
    /// Entries still pending when the run ended
    pub pending: usize,
    /// Items whose processing was aborted by a ledger error
    pub errors: usize,
}

impl RunStats {
    fn absorb(&mut self, outcome: ItemOutcome) {
        self.items += 1;
        self.completed += outcome.completed;
        self.abandoned += outcome.abandoned;
        self.pending += outcome.pending;
    }
}

/// Sleep for `delay` unless cancelled first; returns false on cancellation
pub(crate) async fn backoff(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}
