//! Continuously polling mirror from one source to one destination.
//!
//! Each cycle enumerates items at or after the persisted cursor, records
//! them, advances the cursor, then transfers every pending entry of the
//! watcher's partition (`watch:<name>`). Because the cursor is saved before
//! transfers start, a crash mid-cycle leaves the items in the ledger and the
//! next cycle picks them up as pending work.

use std::time::Duration;

use chrono::Utc;
use tracing::{Instrument, error, info, info_span};

use super::{
    DestinationTarget, EngineContext, PartitionWorker, RunStats, SourceTarget, WorkerError,
    backoff,
};
use crate::config::Config;
use crate::ledger::{WatchCursor, WatchState, WatchStatus};

pub struct Watcher {
    name: String,
    worker: PartitionWorker,
    poll_interval: Duration,
    monitor_only: bool,
    ctx: EngineContext,
}

impl Watcher {
    pub fn new(
        name: impl Into<String>,
        source: SourceTarget,
        destination: DestinationTarget,
        poll_interval: Duration,
        concurrency: usize,
        ctx: EngineContext,
    ) -> Self {
        let name = name.into();
        let worker = PartitionWorker::new(
            Config::watch_partition(&name),
            source,
            vec![destination],
            concurrency,
            ctx.clone(),
        );
        Self {
            name,
            worker,
            poll_interval,
            monitor_only: false,
            ctx,
        }
    }

    /// Record new items without downloading or publishing them
    pub fn monitor_only(mut self, monitor_only: bool) -> Self {
        self.monitor_only = monitor_only;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partition(&self) -> &str {
        self.worker.id()
    }

    /// Poll until cancelled
    pub async fn run(&self) -> Result<(), WorkerError> {
        self.run_loop(false).await
    }

    /// Run a single cycle, then record the watcher as stopped
    pub async fn once(&self) -> Result<(), WorkerError> {
        self.run_loop(true).await
    }

    async fn run_loop(&self, once: bool) -> Result<(), WorkerError> {
        let span = info_span!("watcher", watcher = %self.name);
        async {
            self.ctx
                .ledger
                .bind_destinations(self.worker.id(), &self.worker.destination_names())?;
            info!(
                poll_interval_secs = self.poll_interval.as_secs(),
                monitor_only = self.monitor_only,
                "Watcher started"
            );

            let mut cycle = self.next_cycle()?;
            let mut last = None;
            loop {
                if self.ctx.cancel.is_cancelled() {
                    break;
                }
                last = Some(self.run_cycle(cycle).await?);
                cycle += 1;
                if once || !backoff(&self.ctx.cancel, self.poll_interval).await {
                    break;
                }
            }

            let mut state = last.unwrap_or_else(|| WatchState::starting(cycle, self.monitor_only));
            state.status = WatchStatus::Stopped;
            state.updated_at = Utc::now();
            self.ctx.ledger.save_watch_state(&self.name, &state)?;
            info!("Watcher stopped");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Cycle number following the last persisted one
    pub fn next_cycle(&self) -> Result<u64, WorkerError> {
        Ok(self
            .ctx
            .ledger
            .load_watch_state(&self.name)?
            .map_or(1, |state| state.cycle + 1))
    }

    /// One poll: enumerate from the cursor, discover, advance the cursor,
    /// then transfer pending entries (unless monitoring only).
    pub async fn run_cycle(&self, cycle: u64) -> Result<WatchState, WorkerError> {
        let ledger = &self.ctx.ledger;
        ledger.bind_destinations(self.worker.id(), &self.worker.destination_names())?;

        let mut state = WatchState::starting(cycle, self.monitor_only);
        ledger.save_watch_state(&self.name, &state)?;

        let cursor = ledger.load_cursor(&self.name)?;
        let position = cursor.as_ref().map(|c| c.position.as_str());

        match self.worker.enumerate(position).await {
            Ok(items) => {
                state.new_found = self.worker.discover(&items)?;
                let seen = items.iter().filter_map(|i| i.position.as_deref());
                if let Some(next) = WatchCursor::advance(cursor.as_ref(), seen) {
                    ledger.save_cursor(&self.name, &next)?;
                }
            }
            Err(e) => {
                error!(cycle, error = %e, "Watch enumeration failed");
                state.last_error = Some(e.to_string());
            }
        }

        let stats = if self.monitor_only {
            RunStats::default()
        } else {
            self.worker.process_pending().await?
        };

        state.succeeded = stats.completed;
        state.failed = stats.abandoned + stats.errors;
        state.status = if state.last_error.is_some() {
            WatchStatus::Error
        } else {
            WatchStatus::Idle
        };
        let now = Utc::now();
        state.last_check = Some(now);
        state.updated_at = now;
        ledger.save_watch_state(&self.name, &state)?;

        info!(
            cycle,
            new_found = state.new_found,
            succeeded = state.succeeded,
            failed = state.failed,
            pending = stats.pending,
            "Watch cycle finished"
        );
        Ok(state)
    }
}
