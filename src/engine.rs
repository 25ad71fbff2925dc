//! Wiring from configuration to running workers.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::adapters::{AdapterRegistry, RegistryError};
use crate::config::Config;
use crate::ledger::{FjallLedger, Ledger, LedgerError};
use crate::observability::Metrics;
use crate::staging::Staging;
use crate::worker::{
    DestinationTarget, EngineContext, PartitionWorker, RunStats, SourceTarget, Watcher,
    WorkerError,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Adapter error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Unknown partition: {0}")]
    UnknownPartition(String),

    #[error("Unknown watcher: {0}")]
    UnknownWatcher(String),

    #[error("{failed} worker(s) failed")]
    WorkersFailed { failed: usize },
}

/// Opened ledger, built adapters and the shared worker context
pub struct Engine {
    config: Config,
    ledger: Arc<FjallLedger>,
    registry: AdapterRegistry,
    ctx: EngineContext,
}

impl Engine {
    pub fn open(config: Config, cancel: CancellationToken) -> Result<Self, EngineError> {
        let ledger = Arc::new(FjallLedger::open(&config.engine.ledger_path)?);
        let registry = AdapterRegistry::from_config(&config)?;
        let ctx = EngineContext::builder()
            .ledger(ledger.clone())
            .staging(Staging::new(&config.engine.staging_dir))
            .metrics(Arc::new(Metrics::new()))
            .adapter_timeout(config.engine.adapter_timeout())
            .cancel(cancel)
            .build();

        Ok(Self {
            config,
            ledger,
            registry,
            ctx,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> Arc<dyn Ledger> {
        self.ledger.clone()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.ctx.metrics.clone()
    }

    pub fn partition_worker(&self, id: &str) -> Result<PartitionWorker, EngineError> {
        let partition = self
            .config
            .partitions
            .get(id)
            .ok_or_else(|| EngineError::UnknownPartition(id.to_string()))?;

        let source = SourceTarget::new(
            self.registry.source(&partition.source)?,
            self.config.source_policy(&partition.source),
        );
        let destinations = partition
            .destinations
            .iter()
            .map(|name| {
                Ok(DestinationTarget::new(
                    self.registry.destination(name)?,
                    self.config.destination_policy(name),
                ))
            })
            .collect::<Result<Vec<_>, EngineError>>()?;

        Ok(PartitionWorker::new(
            id,
            source,
            destinations,
            partition.concurrency,
            self.ctx.clone(),
        ))
    }

    pub fn watcher(&self, name: &str) -> Result<Watcher, EngineError> {
        let watcher = self
            .config
            .watchers
            .get(name)
            .ok_or_else(|| EngineError::UnknownWatcher(name.to_string()))?;

        let source = SourceTarget::new(
            self.registry.source(&watcher.source)?,
            self.config.source_policy(&watcher.source),
        );
        let destination = DestinationTarget::new(
            self.registry.destination(&watcher.destination)?,
            self.config.destination_policy(&watcher.destination),
        );

        Ok(Watcher::new(
            name,
            source,
            destination,
            watcher.poll_interval(),
            watcher.concurrency,
            self.ctx.clone(),
        )
        .monitor_only(watcher.monitor_only))
    }

    /// Run every configured partition once and every watcher until
    /// cancelled, each on its own task.
    pub async fn run_all(&self) -> Result<(), EngineError> {
        let partitions = self
            .config
            .partitions
            .keys()
            .map(|id| self.partition_worker(id))
            .collect::<Result<Vec<_>, _>>()?;
        let watchers = self
            .config
            .watchers
            .keys()
            .map(|name| self.watcher(name))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            partitions = partitions.len(),
            watchers = watchers.len(),
            "Starting workers"
        );

        // one task per worker: a panicking adapter takes down only its own
        let mut tasks = JoinSet::new();
        for worker in partitions {
            tasks.spawn(async move {
                let result = worker.run().await;
                report_partition(worker.id(), &result);
                result.is_ok()
            });
        }
        for watcher in watchers {
            tasks.spawn(async move {
                let result = watcher.run().await;
                if let Err(e) = &result {
                    error!(watcher = %watcher.name(), error = %e, "Watcher failed");
                }
                result.is_ok()
            });
        }

        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => {}
                Ok(false) => failed += 1,
                Err(e) => {
                    error!(error = %e, "Worker task aborted");
                    failed += 1;
                }
            }
        }

        self.ledger.persist()?;

        if failed > 0 {
            return Err(EngineError::WorkersFailed { failed });
        }
        Ok(())
    }

    /// Flush the ledger to disk
    pub fn persist(&self) -> Result<(), EngineError> {
        self.ledger.persist()?;
        Ok(())
    }
}

fn report_partition(id: &str, result: &Result<RunStats, WorkerError>) {
    match result {
        Ok(stats) => info!(
            partition = id,
            completed = stats.completed,
            abandoned = stats.abandoned,
            pending = stats.pending,
            "Partition finished"
        ),
        Err(e) => error!(partition = id, error = %e, "Partition failed"),
    }
}
